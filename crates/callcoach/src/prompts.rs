//! Stock agent instructions and the templating applied to them.

use serde::{Deserialize, Serialize};

/// Agent instructions used when a caller supplies no base prompt.
///
/// Contains the `{customer_name}`, `{amount_due}` and `{card_number_ending}`
/// placeholders; see [`CallContext::render`].
pub const DEFAULT_AGENT_INSTRUCTIONS: &str = "\
You are Alex, a voice agent from Foresight Bank calling {customer_name} about an overdue \
credit card payment of {amount_due} dollars on the card ending in {card_number_ending}.

Instructions:
1. Introduce yourself: \"I'm calling about your credit card account.\"
2. State the issue: \"Our records show an overdue payment of {amount_due}. Can you help me understand the situation?\"
3. Listen and respond:
   - If they already paid: \"Thank you for letting me know. I'll note that on your account.\"
   - If they forgot: \"No problem, it happens. Would you like help with payment options?\"
   - If they are angry: stay calm and say \"I understand your frustration. I'm here to help resolve this.\"
   - Only ever offer these payment options: the bank app, the website, or a payment link sent by text.
4. Close politely: \"Thank you for your time. Have a great day.\"

Important:
- Keep responses brief and clear.
- Do not invent account details, amounts, or payment dates.
- Use only the customer name and amount given above.
- Never ask for sensitive information such as full card numbers or SSNs.
- Stay on the topic of the overdue payment.
- If the customer refuses to pay, mention that charges and fees may increase the amount owed, without pressuring them.
";

/// First line the agent hears before it speaks. Same placeholders as
/// [`DEFAULT_AGENT_INSTRUCTIONS`].
pub const DEFAULT_INITIAL_GREETING: &str = "Hello {customer_name}! I'm Alex, an AI assistant, \
calling regarding your account. This call may be recorded for quality and training purposes.";

/// Customer details substituted into agent templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallContext {
    pub customer_name: String,
    pub amount_due: String,
    pub card_number_ending: String,
}

impl CallContext {
    pub fn new(
        customer_name: impl Into<String>,
        amount_due: impl Into<String>,
        card_number_ending: impl Into<String>,
    ) -> Self {
        Self {
            customer_name: customer_name.into(),
            amount_due: amount_due.into(),
            card_number_ending: card_number_ending.into(),
        }
    }

    /// Replace the three placeholders in `template`. Other braces are left
    /// alone, so prompts containing JSON examples survive.
    pub fn render(&self, template: &str) -> String {
        template
            .replace("{customer_name}", &self.customer_name)
            .replace("{amount_due}", &self.amount_due)
            .replace("{card_number_ending}", &self.card_number_ending)
    }
}

/// Render `template` with `context` when one is given, verbatim otherwise.
pub(crate) fn render_with(context: Option<&CallContext>, template: &str) -> String {
    match context {
        Some(ctx) => ctx.render(template),
        None => template.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_fills_all_placeholders() {
        let ctx = CallContext::new("Dana", "120.50", "4242");
        let rendered = ctx.render(DEFAULT_AGENT_INSTRUCTIONS);
        assert!(rendered.contains("calling Dana"));
        assert!(rendered.contains("120.50 dollars"));
        assert!(rendered.contains("ending in 4242"));
        assert!(!rendered.contains("{customer_name}"));
        assert!(!rendered.contains("{amount_due}"));
    }

    #[test]
    fn render_leaves_unrelated_braces() {
        let ctx = CallContext::new("Dana", "10", "0001");
        assert_eq!(ctx.render("{\"a\": 1} {customer_name}"), "{\"a\": 1} Dana");
    }

    #[test]
    fn render_with_none_is_verbatim() {
        assert_eq!(render_with(None, DEFAULT_INITIAL_GREETING), DEFAULT_INITIAL_GREETING);
    }
}
