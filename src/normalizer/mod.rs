//! The pure classify -> resolve -> compose pipeline.
//!
//! Nothing here performs I/O or holds mutable state, so a single
//! [`Normalizer`] can serve any number of concurrent callers.

pub mod classify;
pub mod compose;
pub mod resolve;

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::{
    base::types::{Directive, Question, Topic},
    rules::RuleTable,
};

use classify::Classifier;
use compose::{DirectiveInputs, compose};
use resolve::Resolver;

/// Turns a question into a directive.
#[derive(Debug, Clone)]
pub struct Normalizer {
    classifier: Classifier,
    resolver: Resolver,
}

impl Normalizer {
    pub fn new(rules: Arc<RuleTable>) -> Self {
        Self {
            classifier: Classifier::new(rules.clone()),
            resolver: Resolver::new(rules),
        }
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    #[instrument(skip_all, fields(question_id = question.id()))]
    pub fn normalize(&self, question: &Question) -> Directive {
        let classification = self.classifier.classify_detailed(question);
        let policy = self.resolver.resolve(classification.topic, question);

        if classification.topic == Topic::PiiRequest {
            warn!("Refusing personal data request (matched {:?}).", classification.matched_keywords);
        }

        let directive = compose(
            classification.topic,
            policy,
            DirectiveInputs {
                question_id: question.id().to_string(),
                matched_keywords: classification.matched_keywords,
            },
        );

        debug!("Classified as `{}` ({:?}).", directive.topic(), directive.kind());

        directive
    }
}
