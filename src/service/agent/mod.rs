pub mod http;

use std::{fmt::Write, ops::Deref, sync::Arc};

use async_trait::async_trait;

use crate::base::types::{Directive, Question, Res};

// Traits.

/// Generic hosted-agent client trait that clients must implement.
///
/// The agent receives the question together with the directive's
/// constraints and produces the natural-language answer. Only query
/// directives are ever sent.
#[async_trait]
pub trait GenericAgentClient: Send + Sync + 'static {
    /// Ask the hosted agent a question under the given directive.
    async fn ask(&self, question: &Question, directive: &Directive) -> Res<String>;
}

// Structs.

/// Hosted agent client for the application.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct AgentClient {
    inner: Arc<dyn GenericAgentClient>,
}

impl Deref for AgentClient {
    type Target = dyn GenericAgentClient;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl AgentClient {
    pub fn new(inner: Arc<dyn GenericAgentClient>) -> Self {
        Self { inner }
    }
}

// Helpers.

/// Render the question followed by the directive's constraint block.
pub fn render_prompt(question: &Question, directive: &Directive) -> String {
    let mut prompt = question.text().trim().to_string();

    prompt.push_str("\n\nConstraints:\n");
    let _ = writeln!(prompt, "- Topic: {}", directive.topic());
    let _ = writeln!(prompt, "- Count by: {}", directive.counting_key());
    let _ = writeln!(prompt, "- Required join: {}", directive.required_join());
    let _ = writeln!(prompt, "- Disclosure restriction: {}", directive.disclosure_restriction());

    if let Some(caveat) = directive.caveat_text() {
        let _ = writeln!(prompt, "- Note: {caveat}");
    }

    prompt
}
