//! Run identifiers and token spend accounting.
//!
//! Every training run gets a `run_id`; each persona pipeline inside it logs
//! under a span id derived from that run id, so interleaved log lines from
//! concurrent personas can be told apart.

use uuid::Uuid;

/// Fresh identifier for a training or improvement run.
pub fn generate_run_id() -> String {
    format!("run-{}", Uuid::new_v4().simple())
}

/// Span id for the persona at `persona_index` within `run_id`.
pub fn generate_persona_span_id(run_id: &str, persona_index: usize) -> String {
    format!("{run_id}:p{persona_index}")
}

/// USD per one million tokens.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl ModelPricing {
    const fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }

    pub fn estimate_cost(&self, prompt_tokens: u32, completion_tokens: u32) -> f64 {
        f64::from(prompt_tokens) / 1_000_000.0 * self.input_per_million
            + f64::from(completion_tokens) / 1_000_000.0 * self.output_per_million
    }
}

impl Default for ModelPricing {
    fn default() -> Self {
        Self::new(3.0, 15.0)
    }
}

/// Rough list prices keyed on the model name after the provider prefix.
///
/// Estimates only; good enough to notice a run that is burning money.
pub fn pricing_for_model(model: &str) -> ModelPricing {
    let name = model.rsplit('/').next().unwrap_or(model).to_lowercase();

    if name.contains("4o-mini") {
        ModelPricing::new(0.15, 0.60)
    } else if name.contains("gpt-4") {
        ModelPricing::new(2.50, 10.0)
    } else if name.contains("haiku") {
        ModelPricing::new(0.25, 1.25)
    } else if name.contains("sonnet") {
        ModelPricing::new(3.0, 15.0)
    } else if name.contains("opus") {
        ModelPricing::new(15.0, 75.0)
    } else if name.contains("gemini") && name.contains("flash") {
        ModelPricing::new(0.075, 0.30)
    } else if name.contains("llama") || name.contains("mistral") {
        ModelPricing::new(0.10, 0.10)
    } else {
        ModelPricing::default()
    }
}

/// Cumulative token usage across oracle calls.
#[derive(Debug, Default, Clone)]
pub struct CostTracker {
    pub calls: u64,
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub estimated_cost_usd: f64,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, prompt_tokens: u32, completion_tokens: u32, pricing: &ModelPricing) {
        self.calls += 1;
        self.total_prompt_tokens += u64::from(prompt_tokens);
        self.total_completion_tokens += u64::from(completion_tokens);
        self.estimated_cost_usd += pricing.estimate_cost(prompt_tokens, completion_tokens);
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_prompt_tokens + self.total_completion_tokens
    }

    pub fn summary(&self) -> String {
        format!(
            "{} oracle calls, tokens: {} prompt + {} completion = {} total, est. cost: ${:.4}",
            self.calls,
            self.total_prompt_tokens,
            self.total_completion_tokens,
            self.total_tokens(),
            self.estimated_cost_usd,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_ids_are_unique_and_prefixed() {
        let a = generate_run_id();
        let b = generate_run_id();
        assert_ne!(a, b);
        assert!(a.starts_with("run-"));
    }

    #[test]
    fn persona_span_id_embeds_index() {
        assert_eq!(generate_persona_span_id("run-abc", 2), "run-abc:p2");
    }

    #[test]
    fn pricing_matches_model_segment() {
        assert_eq!(pricing_for_model("openai/gpt-4o-mini"), ModelPricing::new(0.15, 0.60));
        assert!(pricing_for_model("anthropic/claude-3-opus").input_per_million > 10.0);
        assert_eq!(pricing_for_model("unknown/model"), ModelPricing::default());
    }

    #[test]
    fn tracker_accumulates_calls_and_cost() {
        let mut tracker = CostTracker::new();
        let pricing = ModelPricing::new(1.0, 2.0);
        tracker.record(1_000_000, 500_000, &pricing);
        tracker.record(0, 500_000, &pricing);
        assert_eq!(tracker.calls, 2);
        assert_eq!(tracker.total_tokens(), 2_000_000);
        assert!((tracker.estimated_cost_usd - 3.0).abs() < 1e-9);
        assert!(tracker.summary().starts_with("2 oracle calls"));
    }
}
