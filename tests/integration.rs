#![cfg(test)]

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use intent_normalizer::{
    base::{
        config::{Config, ConfigInner},
        messages::{DECLINE_MESSAGE, UNSUPPORTED_SCOPE_MESSAGE},
        types::{AuditPriority, AuditRecord, ClarificationReason, CountingKey, Directive, DirectiveKind, DisclosureRestriction, Question, RequiredJoin, Res, Topic, Void},
    },
    dedup::Deduplicator,
    normalizer::Normalizer,
    rules::RuleTable,
    runtime::{Reply, Runtime},
    service::{
        agent::{AgentClient, GenericAgentClient},
        audit::{AuditLogger, AuditSink, GenericAuditSink},
    },
};
use mockall::mock;

// Mocks.

// Mock audit sink for testing.

mock! {
    pub Sink {}

    #[async_trait]
    impl GenericAuditSink for Sink {
        async fn append(&self, records: &[AuditRecord]) -> Void;
        async fn recent(&self, limit: usize) -> Res<Vec<AuditRecord>>;
    }
}

// Mock hosted agent for testing.

mock! {
    pub Agent {}

    #[async_trait]
    impl GenericAgentClient for Agent {
        async fn ask(&self, question: &Question, directive: &Directive) -> Res<String>;
    }
}

/// An agent that must never be called.
fn get_silent_agent() -> AgentClient {
    let mut mock = MockAgent::new();
    mock.expect_ask().never();

    AgentClient::new(Arc::new(mock))
}

/// A sink that is always down.
fn get_failing_sink() -> AuditSink {
    let mut mock = MockSink::new();
    mock.expect_append().returning(|_| Err(anyhow::anyhow!("audit database unavailable")));
    mock.expect_recent().returning(|_| Ok(Vec::new()));

    AuditSink::new(Arc::new(mock))
}

/// A sink that never finishes a write in time.
struct StalledSink;

#[async_trait]
impl GenericAuditSink for StalledSink {
    async fn append(&self, _records: &[AuditRecord]) -> Void {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(())
    }

    async fn recent(&self, _limit: usize) -> Res<Vec<AuditRecord>> {
        Ok(Vec::new())
    }
}

/// Helper function to setup the test environment.
fn setup_runtime(sink: AuditSink, agent: Option<AgentClient>, config: ConfigInner) -> Runtime {
    let config = Config::from(config);
    let normalizer = Normalizer::new(Arc::new(RuleTable::builtin().expect("Built-in rule table must load")));
    let audit = AuditLogger::from_config(sink, &config);
    let dedup = Arc::new(Deduplicator::from_config(&config));

    Runtime {
        config,
        normalizer,
        audit,
        agent,
        dedup,
    }
}

async fn setup_memory_runtime(agent: Option<AgentClient>) -> Runtime {
    let sink = AuditSink::surreal_memory().await.expect("Failed to create in-memory audit sink");

    setup_runtime(sink, agent, ConfigInner::default())
}

#[tokio::test]
async fn test_operational_price_id_end_to_end() {
    let runtime = setup_memory_runtime(None).await;

    let question = Question::new("Q-OPS-1", "<@U0DEX> operational contracts in January 2025 with price_id 1061")
        .with_channel("C-ASK-DEX")
        .with_user("U1");

    let answer = runtime.handle(&question).await.expect("First delivery must be handled");
    let directive = &answer.directive;

    assert_eq!(answer.reply, Reply::NotForwarded);
    assert_eq!(directive.topic(), Topic::Operational);
    assert_eq!(directive.counting_key(), CountingKey::ContractId);
    assert_eq!(directive.required_join(), RequiredJoin::OperationalTable);
    assert!(directive.caveat_text().unwrap().contains("PRICE_ID"));
    assert!(directive.caveat_text().unwrap().contains("operational table"));

    runtime.audit.flush_now().await;

    let recent = runtime.audit.sink().recent(10).await.expect("Failed to read audit log");
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].question_id, "Q-OPS-1");
    assert_eq!(recent[0].topic, Topic::Operational);
    assert_eq!(recent[0].policy_applied, *directive.policy());
}

#[tokio::test]
async fn test_customers_signed_counts_contracts() {
    let runtime = setup_memory_runtime(None).await;

    for (i, text) in ["How many customers signed in March 2025?", "how many customers signed last week", "How many contracts signed in 2024?"].iter().enumerate() {
        let directive = runtime.process(&Question::new(format!("Q-SIGN-{i}"), *text));

        assert_eq!(directive.topic(), Topic::Signings, "{text}");
        assert_eq!(directive.counting_key(), CountingKey::ContractId, "{text}");
    }
}

#[tokio::test]
async fn test_distinct_users_by_id_counts_users() {
    let runtime = setup_memory_runtime(None).await;

    let texts = [
        "How many distinct users by ID signed in 2025?",
        "Churn last quarter as distinct users by ID",
        "distinct users by id with a discount campaign",
        "Operational contracts counted as distinct users by ID",
    ];

    for (i, text) in texts.iter().enumerate() {
        let directive = runtime.process(&Question::new(format!("Q-UID-{i}"), *text));

        assert!(directive.is_query(), "{text}");
        assert_eq!(directive.counting_key(), CountingKey::UserId, "{text}");
    }
}

#[tokio::test]
async fn test_pii_request_is_refused_and_never_forwarded() {
    let runtime = setup_memory_runtime(Some(get_silent_agent())).await;

    let first = runtime
        .handle(&Question::new("Q-PII-1", "Can you export the emails of all customers who churned?").with_user("U1"))
        .await
        .unwrap();
    let second = runtime
        .handle(&Question::new("Q-PII-2", "Can you export the emails of all customers who churned?").with_user("U2"))
        .await
        .unwrap();

    for answer in [&first, &second] {
        assert!(answer.directive.refuse());
        assert_eq!(answer.directive.kind(), DirectiveKind::Refusal);
        assert_eq!(answer.directive.disclosure_restriction(), DisclosureRestriction::DenyPii);
        assert_eq!(answer.directive.counting_key(), CountingKey::None);
        assert_eq!(answer.reply, Reply::Fixed(DECLINE_MESSAGE.to_string()));
    }

    assert_eq!(first.directive.message().unwrap().as_bytes(), second.directive.message().unwrap().as_bytes());

    runtime.audit.flush_now().await;

    let recent = runtime.audit.sink().recent(10).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert!(recent.iter().all(|r| r.priority == AuditPriority::High));
}

#[tokio::test]
async fn test_discount_in_finland_is_clarified_not_queried() {
    let runtime = setup_memory_runtime(Some(get_silent_agent())).await;

    for (i, text) in ["How many discounts were given in Finland?", "discount campaigns in FI this year", "Compare discounts between SE and FI"].iter().enumerate() {
        let answer = runtime.handle(&Question::new(format!("Q-DISC-{i}"), *text)).await.unwrap();

        assert_eq!(answer.directive.topic(), Topic::Discount, "{text}");
        assert!(answer.directive.policy().unsupported_scope, "{text}");
        assert_eq!(answer.directive.kind(), DirectiveKind::Clarification(ClarificationReason::UnsupportedScope), "{text}");
        assert_eq!(answer.reply, Reply::Fixed(UNSUPPORTED_SCOPE_MESSAGE.to_string()));
    }
}

#[tokio::test]
async fn test_mixed_topic_and_singular_pii_questions_are_never_forwarded() {
    let runtime = setup_memory_runtime(Some(get_silent_agent())).await;

    let cases = [
        ("How many churned contracts had a discount in Finland?", DirectiveKind::Clarification(ClarificationReason::UnsupportedScope)),
        ("operational contracts with a discount in FI", DirectiveKind::Clarification(ClarificationReason::UnsupportedScope)),
        ("What is the name and address of customer 42?", DirectiveKind::Refusal),
        ("give me the phone of the customer on contract 77", DirectiveKind::Refusal),
    ];

    for (i, (text, kind)) in cases.into_iter().enumerate() {
        let answer = runtime.handle(&Question::new(format!("Q-MIX-{i}"), text)).await.unwrap();

        assert_eq!(answer.directive.kind(), kind, "{text}");
        assert!(answer.directive.refuse(), "{text}");
        assert!(matches!(answer.reply, Reply::Fixed(_)), "{text}");
    }
}

#[tokio::test]
async fn test_unknown_question_asks_for_clarification() {
    let runtime = setup_memory_runtime(Some(get_silent_agent())).await;

    let answer = runtime.handle(&Question::new("Q-UNK-1", "What's for lunch today?")).await.unwrap();

    assert_eq!(answer.directive.topic(), Topic::Unknown);
    assert!(!answer.directive.refuse());
    assert_eq!(answer.directive.kind(), DirectiveKind::Clarification(ClarificationReason::AmbiguousQuestion));
    assert_eq!(answer.directive.caveat_text(), Some("clarification_needed"));
    assert!(matches!(answer.reply, Reply::Fixed(_)));
}

#[tokio::test]
async fn test_query_is_forwarded_with_its_directive() {
    let mut agent = MockAgent::new();
    agent
        .expect_ask()
        .withf(|question, directive| question.id() == "Q-DEV-1" && directive.topic() == Topic::Device && directive.counting_key() == CountingKey::UserId)
        .times(1)
        .returning(|_, _| Ok("312 users have a connected Saveye device.".to_string()));

    let runtime = setup_memory_runtime(Some(AgentClient::new(Arc::new(agent)))).await;

    let answer = runtime.handle(&Question::new("Q-DEV-1", "How many Saveye devices are connected?")).await.unwrap();

    assert_eq!(answer.reply, Reply::Answered("312 users have a connected Saveye device.".to_string()));
}

#[tokio::test]
async fn test_agent_failure_still_returns_the_directive() {
    let mut agent = MockAgent::new();
    agent.expect_ask().returning(|_, _| Err(anyhow::anyhow!("503 Service Unavailable")));

    let runtime = setup_memory_runtime(Some(AgentClient::new(Arc::new(agent)))).await;

    let answer = runtime.handle(&Question::new("Q-CH-1", "Signed contracts by sales channel in 2025")).await.unwrap();

    assert_eq!(answer.directive.topic(), Topic::Channel);
    assert!(answer.directive.is_query());
    assert!(matches!(answer.reply, Reply::Failed(ref text) if text.contains("503")));
}

#[tokio::test]
async fn test_redelivered_question_is_ignored() {
    let runtime = setup_memory_runtime(None).await;

    let question = Question::new("Q-DUP-1", "churn rate by country").with_user("U1");

    assert!(runtime.handle(&question).await.is_some());
    assert!(runtime.handle(&question).await.is_none());

    // Same user and text under a fresh id, within the same window.
    let retry = Question::new("Q-DUP-2", "Churn rate  by country").with_user("U1").with_received_at(question.received_at());
    assert!(runtime.handle(&retry).await.is_none());
}

#[tokio::test]
async fn test_audit_sink_failure_never_blocks_and_keeps_newest() {
    let runtime = setup_runtime(
        get_failing_sink(),
        None,
        ConfigInner {
            audit_capacity: 2,
            ..Default::default()
        },
    );

    for (i, text) in ["churn in january", "churn in february", "churn in march"].iter().enumerate() {
        let answer = runtime.handle(&Question::new(format!("Q-AUD-{i}"), *text)).await;
        assert!(answer.is_some());
    }

    assert_eq!(runtime.audit.flush_now().await, 0);

    let pending = runtime.audit.pending().into_iter().map(|r| r.question_id).collect::<Vec<_>>();
    assert_eq!(pending, vec!["Q-AUD-1", "Q-AUD-2"]);
}

#[tokio::test]
async fn test_audit_flush_is_bounded_by_timeout() {
    let runtime = setup_runtime(
        AuditSink::new(Arc::new(StalledSink)),
        None,
        ConfigInner {
            audit_flush_timeout_ms: 20,
            ..Default::default()
        },
    );

    runtime.process(&Question::new("Q-SLOW-1", "payment methods in 2025"));

    let written = tokio::time::timeout(Duration::from_secs(2), runtime.audit.flush_now()).await.expect("Flush must respect its own timeout");

    assert_eq!(written, 0);
    assert_eq!(runtime.audit.pending().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_questions_share_the_rule_table() {
    let runtime = setup_memory_runtime(None).await;

    let cases = [
        ("how many customers signed in may", Topic::Signings),
        ("operational contracts in may", Topic::Operational),
        ("churn in may", Topic::Churn),
        ("ev chargers connected in may", Topic::Device),
        ("invoices sent in may", Topic::Payment),
        ("phone numbers of customers", Topic::PiiRequest),
    ];

    let handles = (0..60)
        .map(|i| {
            let runtime = runtime.clone();
            let (text, topic) = cases[i % cases.len()];

            tokio::spawn(async move { (runtime.process(&Question::new(format!("Q-PAR-{i}"), text)).topic(), topic) })
        })
        .collect::<Vec<_>>();

    for handle in handles {
        let (actual, expected) = handle.await.unwrap();
        assert_eq!(actual, expected);
    }

    runtime.audit.flush_now().await;
    assert_eq!(runtime.audit.sink().recent(100).await.unwrap().len(), 60);
}

#[tokio::test]
async fn test_runtime_refuses_to_start_with_a_broken_rule_table() {
    let config = Config::from(ConfigInner {
        rule_table_path: Some("/nonexistent/rules.toml".to_string()),
        ..Default::default()
    });

    assert!(Runtime::new(config).await.is_err());
}

#[tokio::test]
async fn test_runtime_starts_with_defaults() {
    let runtime = Runtime::new(Config::from(ConfigInner::default())).await.expect("Default runtime must start");

    assert!(runtime.agent.is_none());
    assert_eq!(runtime.process(&Question::new("Q-DEF-1", "new contracts this month")).topic(), Topic::Signings);
}
