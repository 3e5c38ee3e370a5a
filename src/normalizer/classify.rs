//! Topic classification.

use std::sync::Arc;

use crate::{
    base::types::{Question, Topic},
    rules::RuleTable,
};

/// The assigned topic and the keywords that decided it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub topic: Topic,
    pub matched_keywords: Vec<String>,
}

/// Assigns exactly one topic per question: first matching rule wins.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Arc<RuleTable>,
}

impl Classifier {
    pub fn new(rules: Arc<RuleTable>) -> Self {
        Self { rules }
    }

    pub fn classify(&self, question: &Question) -> Topic {
        self.classify_detailed(question).topic
    }

    /// Evaluation order: the privacy gate, then counting-key qualifiers, then the
    /// remaining topic rules in table order. A question carrying only a qualifier
    /// falls back to `signings` instead of `unknown`.
    pub fn classify_detailed(&self, question: &Question) -> Classification {
        let text = question.normalized();
        let mut rules = self.rules.rules().iter();

        // The table guarantees the PII rule comes first.
        if let Some(gate) = rules.next() {
            let matched = gate.matcher.find_all(text);
            if !matched.is_empty() {
                return Classification { topic: gate.topic, matched_keywords: matched };
            }
        }

        let mut qualifiers = self.rules.qualifiers().iter().flat_map(|q| q.matcher.find_all(text)).collect::<Vec<_>>();

        for rule in rules {
            let matched = rule.matcher.find_all(text);
            if !matched.is_empty() {
                qualifiers.extend(matched);
                return Classification { topic: rule.topic, matched_keywords: qualifiers };
            }
        }

        if !qualifiers.is_empty() {
            return Classification { topic: Topic::Signings, matched_keywords: qualifiers };
        }

        Classification {
            topic: Topic::Unknown,
            matched_keywords: Vec::new(),
        }
    }
}
