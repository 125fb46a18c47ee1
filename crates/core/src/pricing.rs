// crates/core/src/pricing.rs
//! Pricing tiers and cost calculation.
//!
//! Costs are a pure mapping from token counters to USD: four independent
//! per-million-token rates, one per counter. The tier for a message is
//! resolved from its model id by substring match — `opus` and `haiku` name
//! their tiers, everything else gets the mid (sonnet-class) tier.

use crate::types::{Role, Session, TokenUsage};
use serde::Serialize;

/// USD rates per million tokens for one model tier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricingTier {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
    pub cache_read_per_mtok: f64,
    pub cache_creation_per_mtok: f64,
}

/// Opus-class rates.
pub const OPUS: PricingTier = PricingTier {
    input_per_mtok: 5.0,
    output_per_mtok: 25.0,
    cache_read_per_mtok: 0.5,
    cache_creation_per_mtok: 6.25,
};

/// Sonnet-class rates — the default when the model is unknown.
pub const SONNET: PricingTier = PricingTier {
    input_per_mtok: 3.0,
    output_per_mtok: 15.0,
    cache_read_per_mtok: 0.3,
    cache_creation_per_mtok: 3.75,
};

/// Haiku-class rates.
pub const HAIKU: PricingTier = PricingTier {
    input_per_mtok: 1.0,
    output_per_mtok: 5.0,
    cache_read_per_mtok: 0.1,
    cache_creation_per_mtok: 1.25,
};

/// Resolve the pricing tier for a model id.
pub fn tier_for_model(model: Option<&str>) -> PricingTier {
    match model {
        Some(m) if m.contains("opus") => OPUS,
        Some(m) if m.contains("haiku") => HAIKU,
        _ => SONNET,
    }
}

/// Cost in USD for one usage snapshot under one tier.
pub fn cost_usd(usage: &TokenUsage, tier: &PricingTier) -> f64 {
    const MTOK: f64 = 1_000_000.0;
    usage.input_tokens as f64 / MTOK * tier.input_per_mtok
        + usage.output_tokens as f64 / MTOK * tier.output_per_mtok
        + usage.cache_read_tokens as f64 / MTOK * tier.cache_read_per_mtok
        + usage.cache_creation_tokens as f64 / MTOK * tier.cache_creation_per_mtok
}

/// Derived statistics for a parsed session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStats {
    pub message_count: usize,
    pub user_messages: usize,
    pub assistant_messages: usize,
    pub usage: TokenUsage,
    pub cost_usd: f64,
    /// Model of the most recent assistant message, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Wall-clock span between first and last message timestamps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<i64>,
}

/// Compute usage, cost, and counts for a session.
///
/// Cost is summed per message so that sessions spanning several models are
/// priced with each message's own tier.
pub fn compute_stats(session: &Session) -> SessionStats {
    let mut stats = SessionStats::default();

    for message in &session.messages {
        stats.message_count += 1;
        match message.role {
            Role::User => stats.user_messages += 1,
            Role::Assistant => stats.assistant_messages += 1,
            Role::System => {}
        }
        stats.usage += message.usage;
        stats.cost_usd += cost_usd(&message.usage, &tier_for_model(message.model.as_deref()));
        if message.role == Role::Assistant && message.model.is_some() {
            stats.model = message.model.clone();
        }
    }

    let timestamps: Vec<_> = session.messages.iter().filter_map(|m| m.timestamp).collect();
    if let (Some(first), Some(last)) = (timestamps.iter().min(), timestamps.iter().max()) {
        stats.duration_secs = Some((*last - *first).num_seconds());
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    fn usage(input: u64, output: u64, read: u64, create: u64) -> TokenUsage {
        TokenUsage {
            input_tokens: input,
            output_tokens: output,
            cache_read_tokens: read,
            cache_creation_tokens: create,
        }
    }

    #[test]
    fn test_zero_usage_costs_zero() {
        assert_eq!(cost_usd(&TokenUsage::default(), &OPUS), 0.0);
        assert_eq!(cost_usd(&TokenUsage::default(), &SONNET), 0.0);
    }

    #[test]
    fn test_cost_per_million() {
        // 1M input tokens at sonnet rates = $3.00 exactly.
        let c = cost_usd(&usage(1_000_000, 0, 0, 0), &SONNET);
        assert!((c - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_cost_linear_in_each_counter() {
        let base = cost_usd(&usage(100, 0, 0, 0), &SONNET);
        let double = cost_usd(&usage(200, 0, 0, 0), &SONNET);
        assert!((double - 2.0 * base).abs() < 1e-12);

        let out1 = cost_usd(&usage(0, 500, 0, 0), &OPUS);
        let out3 = cost_usd(&usage(0, 1500, 0, 0), &OPUS);
        assert!((out3 - 3.0 * out1).abs() < 1e-12);
    }

    #[test]
    fn test_cost_sums_categories_independently() {
        let combined = cost_usd(&usage(10, 20, 30, 40), &HAIKU);
        let separate = cost_usd(&usage(10, 0, 0, 0), &HAIKU)
            + cost_usd(&usage(0, 20, 0, 0), &HAIKU)
            + cost_usd(&usage(0, 0, 30, 0), &HAIKU)
            + cost_usd(&usage(0, 0, 0, 40), &HAIKU);
        assert!((combined - separate).abs() < 1e-12);
    }

    #[test]
    fn test_opus_at_least_default_tier() {
        let u = usage(1000, 2000, 3000, 4000);
        assert!(cost_usd(&u, &OPUS) >= cost_usd(&u, &SONNET));
        assert!(cost_usd(&u, &SONNET) >= cost_usd(&u, &HAIKU));
    }

    #[test]
    fn test_tier_resolution_by_substring() {
        assert_eq!(tier_for_model(Some("claude-opus-4-6-20260201")), OPUS);
        assert_eq!(tier_for_model(Some("claude-haiku-4-5-20251001")), HAIKU);
        assert_eq!(tier_for_model(Some("claude-sonnet-4-6")), SONNET);
        assert_eq!(tier_for_model(Some("some-unknown-model")), SONNET);
        assert_eq!(tier_for_model(None), SONNET);
    }

    #[test]
    fn test_compute_stats() {
        let t0 = "2026-02-03T10:00:00Z".parse().unwrap();
        let t1 = "2026-02-03T10:05:00Z".parse().unwrap();
        let session = Session::new(
            "s1",
            "/tmp/s1.jsonl",
            None,
            None,
            vec![
                Message::new("u1", Role::User).with_timestamp(t0),
                Message::new("a1", Role::Assistant)
                    .with_model("claude-opus-4-6")
                    .with_usage(usage(1_000_000, 0, 0, 0))
                    .with_timestamp(t1),
            ],
        );

        let stats = compute_stats(&session);
        assert_eq!(stats.message_count, 2);
        assert_eq!(stats.user_messages, 1);
        assert_eq!(stats.assistant_messages, 1);
        assert_eq!(stats.usage.input_tokens, 1_000_000);
        assert!((stats.cost_usd - 5.0).abs() < 1e-9); // opus input rate
        assert_eq!(stats.model.as_deref(), Some("claude-opus-4-6"));
        assert_eq!(stats.duration_secs, Some(300));
    }

    #[test]
    fn test_compute_stats_mixed_models() {
        let session = Session::new(
            "s1",
            "/tmp/s1.jsonl",
            None,
            None,
            vec![
                Message::new("a1", Role::Assistant)
                    .with_model("claude-haiku-4-5")
                    .with_usage(usage(1_000_000, 0, 0, 0)),
                Message::new("a2", Role::Assistant)
                    .with_model("claude-opus-4-6")
                    .with_usage(usage(1_000_000, 0, 0, 0)),
            ],
        );
        let stats = compute_stats(&session);
        // $1 haiku + $5 opus
        assert!((stats.cost_usd - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_compute_stats_empty_session() {
        let session = Session::new("s1", "/tmp/s1.jsonl", None, None, vec![]);
        let stats = compute_stats(&session);
        assert_eq!(stats.message_count, 0);
        assert_eq!(stats.cost_usd, 0.0);
        assert!(stats.duration_secs.is_none());
    }
}
