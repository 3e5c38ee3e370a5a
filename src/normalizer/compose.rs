//! Directive composition.

use crate::base::{
    messages::{CLARIFICATION_MESSAGE, DECLINE_MESSAGE, UNSUPPORTED_SCOPE_MESSAGE},
    types::{ClarificationReason, Directive, DirectiveKind, Policy, Topic},
};

/// Per-question values carried into the directive.
#[derive(Debug, Clone, Default)]
pub struct DirectiveInputs {
    pub question_id: String,
    pub matched_keywords: Vec<String>,
}

/// Build the final directive.
///
/// Refusals and clarifications carry one of the fixed texts in
/// [`crate::base::messages`]; the policy caveat is passed through verbatim.
pub fn compose(topic: Topic, policy: Policy, inputs: DirectiveInputs) -> Directive {
    let (kind, message) = if topic == Topic::PiiRequest {
        (DirectiveKind::Refusal, Some(DECLINE_MESSAGE))
    } else if policy.unsupported_scope {
        (DirectiveKind::Clarification(ClarificationReason::UnsupportedScope), Some(UNSUPPORTED_SCOPE_MESSAGE))
    } else if topic == Topic::Unknown {
        (DirectiveKind::Clarification(ClarificationReason::AmbiguousQuestion), Some(CLARIFICATION_MESSAGE))
    } else {
        (DirectiveKind::Query, None)
    };

    Directive::new(inputs.question_id, topic, policy, inputs.matched_keywords, kind, message.map(str::to_string))
}
