//! Policy resolution.

use std::sync::Arc;

use crate::{
    base::types::{CountingKey, Country, DisclosureRestriction, Policy, Question, Topic},
    rules::{Qualifier, RuleTable},
};

/// Maps a topic, plus any explicit qualifiers in the question, to a policy.
#[derive(Debug, Clone)]
pub struct Resolver {
    rules: Arc<RuleTable>,
}

impl Resolver {
    pub fn new(rules: Arc<RuleTable>) -> Self {
        Self { rules }
    }

    pub fn resolve(&self, topic: Topic, question: &Question) -> Policy {
        let Some(base) = self.rules.policy(topic) else {
            return Policy::clarification();
        };

        let text = question.normalized();
        let mut policy = base.clone();

        match topic {
            Topic::PiiRequest => {
                // Nothing is counted for a refused request.
                policy.counting_key = CountingKey::None;
                policy.disclosure_restriction = DisclosureRestriction::DenyPii;
                return policy;
            }
            // "customers" still means contracts here.
            Topic::Signings => policy.counting_key = CountingKey::ContractId,
            Topic::Device => policy.counting_key = CountingKey::UserId,
            _ => {}
        }

        // Discount data is Swedish-only, whichever topic won.
        if topic == Topic::Discount || self.mentions_discount(text) {
            policy.disclosure_restriction = DisclosureRestriction::CountryRestricted(Country::Se);
            policy.unsupported_scope = self.rules.discount_scope().is_match(text);
        }

        if let Some(qualifier) = self.qualifier(text)
            && qualifier.counting_key != policy.counting_key
        {
            policy.counting_key = qualifier.counting_key;
            policy.caveat_text = qualifier.caveat_text.clone();
        }

        policy
    }

    fn mentions_discount(&self, text: &str) -> bool {
        self.rules.rule(Topic::Discount).is_some_and(|rule| rule.matcher.is_match(text))
    }

    /// The first qualifier present in the text.
    fn qualifier(&self, text: &str) -> Option<&Qualifier> {
        self.rules.qualifiers().iter().find(|q| q.matcher.is_match(text))
    }
}
