//! Runtime services and shared state for the intent normalizer.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, instrument, warn};

use crate::{
    base::{
        config::Config,
        types::{Directive, Question, Res, Void},
    },
    dedup::Deduplicator,
    normalizer::Normalizer,
    rules::RuleTable,
    service::{
        agent::AgentClient,
        audit::{AuditLogger, AuditSink},
    },
};

/// What the caller should show the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "text", rename_all = "snake_case")]
pub enum Reply {
    /// A refusal or clarification; fixed text, never forwarded.
    Fixed(String),
    /// The hosted agent's answer.
    Answered(String),
    /// The hosted agent could not be reached or returned an error.
    Failed(String),
    /// No agent is configured; only the directive is available.
    NotForwarded,
}

/// A processed question.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub directive: Directive,
    pub reply: Reply,
}

/// Runtime service context that can be shared across the application.
///
/// This struct holds the normalizer, audit logger, agent client, and configuration.
/// It is designed to be trivially cloneable, allowing it to be passed around
/// without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct Runtime {
    /// The configuration for the application.
    pub config: Config,
    /// The classify -> resolve -> compose pipeline.
    pub normalizer: Normalizer,
    /// The audit logger instance.
    pub audit: AuditLogger,
    /// The hosted agent client, when an endpoint is configured.
    pub agent: Option<AgentClient>,
    /// Redelivery filter.
    pub dedup: Arc<Deduplicator>,
}

impl Runtime {
    /// Create a new runtime instance.
    ///
    /// Fails when the rule table cannot be loaded; an unreachable audit
    /// database only degrades to an in-memory one.
    #[instrument(skip_all)]
    pub async fn new(config: Config) -> Res<Self> {
        // Load the rule table.
        let rules = Arc::new(RuleTable::load(&config)?);
        let normalizer = Normalizer::new(rules);

        // Initialize the audit log.
        let sink = match AuditSink::surreal(&config).await {
            Ok(sink) => sink,
            Err(err) => {
                error!("Audit database unavailable ({}), falling back to an in-memory log.", err);
                AuditSink::surreal_memory().await?
            }
        };
        let audit = AuditLogger::from_config(sink, &config);

        // Initialize the agent client.
        let agent = if config.agent_endpoint.is_some() {
            Some(AgentClient::http(&config)?)
        } else {
            warn!("No agent endpoint configured; directives will not be forwarded.");
            None
        };

        let dedup = Arc::new(Deduplicator::from_config(&config));

        Ok(Self {
            config,
            normalizer,
            audit,
            agent,
            dedup,
        })
    }

    /// Normalize a question and record the decision.
    pub fn process(&self, question: &Question) -> Directive {
        let directive = self.normalizer.normalize(question);

        self.audit.record(question.id(), directive.topic(), directive.policy());

        directive
    }

    /// Process a question end to end; `None` for a redelivered question.
    #[instrument(skip_all, fields(question_id = question.id()))]
    pub async fn handle(&self, question: &Question) -> Option<Answer> {
        if !self.dedup.first_delivery(question) {
            info!("Ignoring redelivered question.");
            return None;
        }

        let directive = self.process(question);

        let reply = if !directive.is_query() {
            Reply::Fixed(directive.message().unwrap_or_default().to_string())
        } else if let Some(agent) = &self.agent {
            match agent.ask(question, &directive).await {
                Ok(text) => Reply::Answered(text),
                Err(err) => {
                    error!("Error calling the hosted agent: {}", err);
                    Reply::Failed(format!("{err}"))
                }
            }
        } else {
            Reply::NotForwarded
        };

        Some(Answer { directive, reply })
    }

    /// Handle a single question and print the result.
    pub async fn run_once(&self, text: &str) -> Void {
        let question = Question::new(format!("cli-{}", Utc::now().timestamp_millis()), text).with_channel("cli");

        self.emit(&question).await?;
        self.audit.flush_now().await;

        Ok(())
    }

    /// Read one question per stdin line until EOF or Ctrl-C.
    pub async fn start(&self) -> Void {
        let started = Utc::now().timestamp_millis();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut seq = 0u64;

        info!("Reading questions from stdin ...");

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        break;
                    };

                    let text = line.trim();
                    if text.is_empty() {
                        continue;
                    }

                    seq += 1;
                    let question = Question::new(format!("stdin-{started}-{seq}"), text).with_channel("stdin");
                    self.emit(&question).await?;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl-C, shutting down ...");
                    break;
                }
            }
        }

        let written = self.audit.flush_now().await;
        info!("Flushed {} audit records on shutdown.", written);

        Ok(())
    }

    async fn emit(&self, question: &Question) -> Void {
        if let Some(answer) = self.handle(question).await {
            println!("{}", serde_json::to_string(&answer)?);
        }

        Ok(())
    }
}
