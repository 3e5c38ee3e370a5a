//! SurrealDB implementation of the audit sink.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::{
    RecordId, Surreal,
    engine::any::{self, Any},
    opt::auth::Root,
};
use tracing::{info, instrument};

use crate::base::{
    config::Config,
    types::{AuditPriority, AuditRecord, Policy, Res, Void},
};

use super::{AuditSink, GenericAuditSink};

// Extra methods on `AuditSink` applied by the surreal implementation.

impl AuditSink {
    /// Connect to the audit database named in the config.
    pub async fn surreal(config: &Config) -> Res<Self> {
        let credentials = config.audit_db_username.as_deref().zip(config.audit_db_password.as_deref());
        let sink = SurrealAuditSink::new(&config.audit_db_endpoint, credentials).await?;

        Ok(Self { inner: Arc::new(sink) })
    }

    /// An in-memory audit database, for tests and local runs.
    pub async fn surreal_memory() -> Res<Self> {
        let sink = SurrealAuditSink::new("mem://", None).await?;

        Ok(Self { inner: Arc::new(sink) })
    }
}

const AUDIT_TABLE: &str = "audit";

// Rows.

/// An audit record as stored; enums are kept as their string forms.
///
/// The record id is derived from the question id and timestamp, so writing the
/// same record twice leaves one row.
#[derive(Debug, Serialize, Deserialize)]
struct AuditRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<RecordId>,
    question_id: String,
    topic: String,
    counting_key: String,
    required_join: String,
    disclosure_restriction: String,
    #[serde(default)]
    caveat_text: Option<String>,
    unsupported_scope: bool,
    priority: String,
    timestamp: String,
}

impl From<&AuditRecord> for AuditRow {
    fn from(record: &AuditRecord) -> Self {
        let policy = &record.policy_applied;

        let key = format!("{}@{}", record.question_id, record.timestamp.timestamp_nanos_opt().unwrap_or_default());

        Self {
            id: Some(RecordId::from_table_key(AUDIT_TABLE, key)),
            question_id: record.question_id.clone(),
            topic: record.topic.to_string(),
            counting_key: policy.counting_key.to_string(),
            required_join: policy.required_join.to_string(),
            disclosure_restriction: policy.disclosure_restriction.to_string(),
            caveat_text: policy.caveat_text.clone(),
            unsupported_scope: policy.unsupported_scope,
            priority: match record.priority {
                AuditPriority::Normal => "normal",
                AuditPriority::High => "high",
            }
            .to_string(),
            // Fixed-width UTC so that string order is time order.
            timestamp: record.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
        }
    }
}

impl TryFrom<AuditRow> for AuditRecord {
    type Error = anyhow::Error;

    fn try_from(row: AuditRow) -> Res<Self> {
        Ok(Self {
            question_id: row.question_id,
            topic: row.topic.parse()?,
            policy_applied: Policy {
                counting_key: row.counting_key.parse()?,
                required_join: row.required_join.parse()?,
                disclosure_restriction: row.disclosure_restriction.parse()?,
                caveat_text: row.caveat_text,
                unsupported_scope: row.unsupported_scope,
            },
            priority: match row.priority.as_str() {
                "high" => AuditPriority::High,
                _ => AuditPriority::Normal,
            },
            timestamp: DateTime::parse_from_rfc3339(&row.timestamp)?.with_timezone(&Utc),
        })
    }
}

// Specific implementations.

/// SurrealDB audit sink.
#[derive(Clone)]
pub struct SurrealAuditSink {
    db: Surreal<Any>,
}

impl SurrealAuditSink {
    /// Connect, sign in when credentials are given, and define the schema.
    #[instrument(name = "SurrealAuditSink::new", skip(credentials))]
    pub async fn new(endpoint: &str, credentials: Option<(&str, &str)>) -> Res<Self> {
        let db = any::connect(endpoint).await?;

        if let Some((username, password)) = credentials {
            db.signin(Root { username, password }).await?;
        }

        db.use_ns("intent").use_db("audit").await?;

        db.query("DEFINE TABLE IF NOT EXISTS audit SCHEMALESS").await?.check()?;
        db.query("DEFINE INDEX IF NOT EXISTS audit_timestamp ON audit FIELDS timestamp").await?.check()?;

        info!("Audit database initialized at `{}`.", endpoint);

        Ok(Self { db })
    }
}

#[async_trait]
impl GenericAuditSink for SurrealAuditSink {
    /// Writes the batch in one statement; rows already stored by an earlier,
    /// interrupted attempt are skipped.
    #[instrument(skip_all, fields(count = records.len()))]
    async fn append(&self, records: &[AuditRecord]) -> Void {
        let rows = records.iter().map(AuditRow::from).collect::<Vec<_>>();

        self.db.query("INSERT IGNORE INTO audit $rows").bind(("rows", rows)).await?.check()?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn recent(&self, limit: usize) -> Res<Vec<AuditRecord>> {
        let mut response = self.db.query("SELECT * FROM audit ORDER BY timestamp DESC LIMIT $limit").bind(("limit", limit)).await?;
        let rows: Vec<AuditRow> = response.take(0)?;

        rows.into_iter().map(AuditRecord::try_from).collect()
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use crate::base::types::{CountingKey, Country, DisclosureRestriction, RequiredJoin, Topic};

    use super::*;

    #[tokio::test]
    async fn test_append_then_read_back_newest_first() {
        let sink = AuditSink::surreal_memory().await.unwrap();

        let discount = Policy {
            counting_key: CountingKey::ContractId,
            required_join: RequiredJoin::None,
            disclosure_restriction: DisclosureRestriction::CountryRestricted(Country::Se),
            caveat_text: Some("Discount data is available for Sweden (SE) only.".to_string()),
            unsupported_scope: true,
        };

        let first = AuditRecord::new("q1", Topic::Discount, discount);
        let mut second = AuditRecord::new("q2", Topic::PiiRequest, Policy::clarification());
        second.timestamp = first.timestamp + chrono::Duration::seconds(1);

        sink.append(&[first.clone(), second.clone()]).await.unwrap();

        let recent = sink.recent(10).await.unwrap();

        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].question_id, "q2");
        assert_eq!(recent[0].priority, AuditPriority::High);
        assert_eq!(recent[1].policy_applied, first.policy_applied);
        assert_eq!(recent[1].timestamp, first.timestamp);
    }

    #[tokio::test]
    async fn test_retried_batch_does_not_duplicate_rows() {
        let sink = AuditSink::surreal_memory().await.unwrap();

        let first = AuditRecord::new("q1", Topic::Churn, Policy::clarification());
        let second = AuditRecord::new("q2", Topic::Churn, Policy::clarification());
        let third = AuditRecord::new("q3", Topic::Churn, Policy::clarification());

        // An interrupted flush stored only the first record; the whole batch comes back.
        sink.append(std::slice::from_ref(&first)).await.unwrap();
        sink.append(&[first, second, third]).await.unwrap();

        let mut ids = sink.recent(10).await.unwrap().into_iter().map(|r| r.question_id).collect::<Vec<_>>();
        ids.sort();

        assert_eq!(ids, vec!["q1", "q2", "q3"]);
    }

    #[tokio::test]
    async fn test_same_question_at_different_times_keeps_both_rows() {
        let sink = AuditSink::surreal_memory().await.unwrap();

        let first = AuditRecord::new("q1", Topic::Churn, Policy::clarification());
        let mut again = first.clone();
        again.timestamp = first.timestamp + chrono::Duration::seconds(1);

        sink.append(&[first, again]).await.unwrap();

        assert_eq!(sink.recent(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_recent_honors_limit() {
        let sink = AuditSink::surreal_memory().await.unwrap();

        let records = (0..5).map(|i| AuditRecord::new(format!("q{i}"), Topic::Churn, Policy::clarification())).collect::<Vec<_>>();
        sink.append(&records).await.unwrap();

        assert_eq!(sink.recent(3).await.unwrap().len(), 3);
    }
}
