//! Token usage accounting and cost derivation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Raw usage payload as reported inside `response.done`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub input_token_details: Option<TokenDetails>,
    #[serde(default)]
    pub output_token_details: Option<TokenDetails>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TokenDetails {
    #[serde(default)]
    pub text_tokens: Option<u64>,
    #[serde(default)]
    pub audio_tokens: Option<u64>,
}

/// Cumulative token counters for one session. Counters only ever grow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub text_input: u64,
    pub text_output: u64,
    pub audio_input: u64,
    pub audio_output: u64,
}

impl TokenUsage {
    /// Adds one usage report.
    ///
    /// Text counts come from the token details when present and fall back to
    /// the aggregate input/output totals; audio counts default to zero.
    pub fn absorb(&mut self, usage: &Usage) {
        let input = usage.input_token_details.clone().unwrap_or_default();
        let output = usage.output_token_details.clone().unwrap_or_default();

        self.text_input = self
            .text_input
            .saturating_add(input.text_tokens.unwrap_or(usage.input_tokens));
        self.text_output = self
            .text_output
            .saturating_add(output.text_tokens.unwrap_or(usage.output_tokens));
        self.audio_input = self
            .audio_input
            .saturating_add(input.audio_tokens.unwrap_or(0));
        self.audio_output = self
            .audio_output
            .saturating_add(output.audio_tokens.unwrap_or(0));
    }

    pub fn total(&self) -> u64 {
        self.text_input + self.text_output + self.audio_input + self.audio_output
    }
}

/// USD prices per one million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub text_input: f64,
    pub text_output: f64,
    pub audio_input: f64,
    pub audio_output: f64,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            text_input: 4.0,
            text_output: 16.0,
            audio_input: 32.0,
            audio_output: 64.0,
        }
    }
}

impl Pricing {
    /// Per-category costs, each rounded to 6 decimals. The total is rounded
    /// from the unrounded sum.
    pub fn breakdown(&self, tokens: &TokenUsage) -> CostBreakdown {
        let cost = |count: u64, price: f64| count as f64 / 1_000_000.0 * price;
        let text_input = cost(tokens.text_input, self.text_input);
        let text_output = cost(tokens.text_output, self.text_output);
        let audio_input = cost(tokens.audio_input, self.audio_input);
        let audio_output = cost(tokens.audio_output, self.audio_output);
        CostBreakdown {
            text_input: round6(text_input),
            text_output: round6(text_output),
            audio_input: round6(audio_input),
            audio_output: round6(audio_output),
            total: round6(text_input + text_output + audio_input + audio_output),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CostBreakdown {
    pub text_input: f64,
    pub text_output: f64,
    pub audio_input: f64,
    pub audio_output: f64,
    pub total: f64,
}

/// Usage summary handed to the conversation recorder at teardown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSummary {
    pub session_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub duration_seconds: f64,
    pub tokens: TokenUsage,
    pub cost_usd: f64,
    pub cost_breakdown: CostBreakdown,
}

pub(crate) fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(text_in: u64, text_out: u64, audio_in: u64, audio_out: u64) -> Usage {
        Usage {
            input_tokens: text_in + audio_in,
            output_tokens: text_out + audio_out,
            input_token_details: Some(TokenDetails {
                text_tokens: Some(text_in),
                audio_tokens: Some(audio_in),
            }),
            output_token_details: Some(TokenDetails {
                text_tokens: Some(text_out),
                audio_tokens: Some(audio_out),
            }),
        }
    }

    #[test]
    fn test_absorb_is_additive_and_order_independent() {
        let first = usage(100, 50, 0, 0);
        let second = usage(0, 0, 1000, 2000);

        let mut forward = TokenUsage::default();
        forward.absorb(&first);
        forward.absorb(&second);

        let mut backward = TokenUsage::default();
        backward.absorb(&second);
        backward.absorb(&first);

        let expected = TokenUsage {
            text_input: 100,
            text_output: 50,
            audio_input: 1000,
            audio_output: 2000,
        };
        assert_eq!(forward, expected);
        assert_eq!(backward, expected);
        assert_eq!(forward.total(), 3150);
    }

    #[test]
    fn test_absorb_falls_back_to_aggregate_counts() {
        let mut tokens = TokenUsage::default();
        tokens.absorb(&Usage {
            input_tokens: 12,
            output_tokens: 7,
            input_token_details: None,
            output_token_details: None,
        });

        assert_eq!(tokens.text_input, 12);
        assert_eq!(tokens.text_output, 7);
        assert_eq!(tokens.audio_input, 0);
        assert_eq!(tokens.audio_output, 0);
    }

    #[test]
    fn test_usage_deserializes_from_partial_payload() {
        let usage: Usage = serde_json::from_str(r#"{"input_tokens": 5}"#).unwrap();
        assert_eq!(usage.input_tokens, 5);
        assert_eq!(usage.output_tokens, 0);
        assert!(usage.input_token_details.is_none());
    }

    #[test]
    fn test_cost_breakdown_with_default_pricing() {
        let tokens = TokenUsage {
            text_input: 1_000_000,
            text_output: 500_000,
            audio_input: 250_000,
            audio_output: 1,
        };
        let breakdown = Pricing::default().breakdown(&tokens);

        assert_eq!(breakdown.text_input, 4.0);
        assert_eq!(breakdown.text_output, 8.0);
        assert_eq!(breakdown.audio_input, 8.0);
        assert_eq!(breakdown.audio_output, 0.000064);
        assert_eq!(breakdown.total, 20.000064);
    }

    #[test]
    fn test_total_rounds_unrounded_sum() {
        let pricing = Pricing {
            text_input: 0.4,
            text_output: 0.4,
            audio_input: 0.4,
            audio_output: 0.4,
        };
        let tokens = TokenUsage {
            text_input: 1,
            text_output: 1,
            audio_input: 1,
            audio_output: 1,
        };
        let breakdown = pricing.breakdown(&tokens);

        assert_eq!(breakdown.text_input, 0.0);
        assert_eq!(breakdown.audio_output, 0.0);
        assert_eq!(breakdown.total, 0.000002);
    }
}
