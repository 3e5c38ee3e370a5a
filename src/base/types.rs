use std::{fmt, str::FromStr, sync::LazyLock};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};

pub type Err = anyhow::Error;
pub type Res<T> = Result<T, Err>;
pub type Void = Res<()>;

// Question.

/// Slack user-mention tokens, e.g. `<@U0123ABC>`.
static MENTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<@[A-Za-z0-9]+>").expect("mention pattern is valid"));

/// Lower-case, strip user mentions, and collapse whitespace.
pub fn normalize_text(text: &str) -> String {
    let stripped = MENTION.replace_all(text, " ");
    stripped.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// An inbound question, as delivered by the chat integration.
///
/// The normalized text is computed once at construction; the raw text is never touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    id: String,
    text: String,
    normalized: String,
    received_at: DateTime<Utc>,
    channel: Option<String>,
    user: Option<String>,
}

impl Question {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        let normalized = normalize_text(&text);

        Self {
            id: id.into(),
            text,
            normalized,
            received_at: Utc::now(),
            channel: None,
            user: None,
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Lower-cased, mention-free, whitespace-collapsed copy of the text.
    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }
}

// Topic.

/// The single category assigned to every question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, SerializeDisplay, DeserializeFromStr)]
pub enum Topic {
    Signings,
    Operational,
    Churn,
    Channel,
    Discount,
    Payment,
    Device,
    PiiRequest,
    Unknown,
}

impl Topic {
    pub const ALL: [Topic; 9] = [
        Topic::Signings,
        Topic::Operational,
        Topic::Churn,
        Topic::Channel,
        Topic::Discount,
        Topic::Payment,
        Topic::Device,
        Topic::PiiRequest,
        Topic::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Signings => "signings",
            Self::Operational => "operational",
            Self::Churn => "churn",
            Self::Channel => "channel",
            Self::Discount => "discount",
            Self::Payment => "payment",
            Self::Device => "device",
            Self::PiiRequest => "pii_request",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = Err;

    fn from_str(s: &str) -> Res<Self> {
        Topic::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow!("Unknown topic `{s}`."))
    }
}

// Policy parts.

/// The key a count must be taken over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, SerializeDisplay, DeserializeFromStr)]
pub enum CountingKey {
    ContractId,
    UserId,
    CustomerId,
    None,
}

impl fmt::Display for CountingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ContractId => "CONTRACT_ID",
            Self::UserId => "USER_ID",
            Self::CustomerId => "CUSTOMER_ID",
            Self::None => "none",
        })
    }
}

impl FromStr for CountingKey {
    type Err = Err;

    fn from_str(s: &str) -> Res<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "contract_id" => Ok(Self::ContractId),
            "user_id" => Ok(Self::UserId),
            "customer_id" => Ok(Self::CustomerId),
            "none" => Ok(Self::None),
            _ => Err(anyhow!("Unknown counting key `{s}`.")),
        }
    }
}

/// An extra table the downstream query must join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, SerializeDisplay, DeserializeFromStr)]
pub enum RequiredJoin {
    None,
    OperationalTable,
}

impl fmt::Display for RequiredJoin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::OperationalTable => "operational_table",
        })
    }
}

impl FromStr for RequiredJoin {
    type Err = Err;

    fn from_str(s: &str) -> Res<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "operational_table" => Ok(Self::OperationalTable),
            _ => Err(anyhow!("Unknown required join `{s}`.")),
        }
    }
}

/// Markets the data view covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Country {
    Se,
    Fi,
}

impl fmt::Display for Country {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Se => "SE",
            Self::Fi => "FI",
        })
    }
}

impl FromStr for Country {
    type Err = Err;

    fn from_str(s: &str) -> Res<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SE" => Ok(Self::Se),
            "FI" => Ok(Self::Fi),
            _ => Err(anyhow!("Unknown country `{s}`.")),
        }
    }
}

/// What may be disclosed in an answer.
///
/// Serialized as `none`, `deny_pii`, or `country_restricted(SE)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, SerializeDisplay, DeserializeFromStr)]
pub enum DisclosureRestriction {
    None,
    DenyPii,
    CountryRestricted(Country),
}

impl fmt::Display for DisclosureRestriction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::DenyPii => f.write_str("deny_pii"),
            Self::CountryRestricted(country) => write!(f, "country_restricted({country})"),
        }
    }
}

impl FromStr for DisclosureRestriction {
    type Err = Err;

    fn from_str(s: &str) -> Res<Self> {
        let trimmed = s.trim();
        let lower = trimmed.to_ascii_lowercase();

        match lower.as_str() {
            "none" => Ok(Self::None),
            "deny_pii" => Ok(Self::DenyPii),
            _ => {
                let country = lower
                    .strip_prefix("country_restricted(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .ok_or_else(|| anyhow!("Unknown disclosure restriction `{trimmed}`."))?;

                Ok(Self::CountryRestricted(country.parse()?))
            }
        }
    }
}

/// The counting and disclosure rules that apply to one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub counting_key: CountingKey,
    pub required_join: RequiredJoin,
    pub disclosure_restriction: DisclosureRestriction,
    #[serde(default)]
    pub caveat_text: Option<String>,
    /// Set when the question asks for data the view cannot answer.
    #[serde(default)]
    pub unsupported_scope: bool,
}

impl Policy {
    /// Terminal policy for questions that matched no topic.
    pub fn clarification() -> Self {
        Self {
            counting_key: CountingKey::None,
            required_join: RequiredJoin::None,
            disclosure_restriction: DisclosureRestriction::None,
            caveat_text: Some("clarification_needed".to_string()),
            unsupported_scope: false,
        }
    }
}

// Directive.

/// Why a directive asks the user to rephrase instead of querying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClarificationReason {
    AmbiguousQuestion,
    UnsupportedScope,
}

/// The branch the composer took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectiveKind {
    Query,
    Clarification(ClarificationReason),
    Refusal,
}

/// Resolved constraint set handed to the analytics agent.
///
/// Produced once per question and never mutated; the policy is flattened
/// into the serialized form so the agent sees `counting_key`,
/// `required_join`, `disclosure_restriction` and `caveat_text` at the top level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Directive {
    question_id: String,
    topic: Topic,
    #[serde(flatten)]
    policy: Policy,
    matched_keywords: Vec<String>,
    refuse: bool,
    kind: DirectiveKind,
    message: Option<String>,
}

impl Directive {
    pub(crate) fn new(question_id: String, topic: Topic, policy: Policy, matched_keywords: Vec<String>, kind: DirectiveKind, message: Option<String>) -> Self {
        let refuse = matches!(kind, DirectiveKind::Refusal | DirectiveKind::Clarification(ClarificationReason::UnsupportedScope));

        Self {
            question_id,
            topic,
            policy,
            matched_keywords,
            refuse,
            kind,
            message,
        }
    }

    pub fn question_id(&self) -> &str {
        &self.question_id
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn counting_key(&self) -> CountingKey {
        self.policy.counting_key
    }

    pub fn required_join(&self) -> RequiredJoin {
        self.policy.required_join
    }

    pub fn disclosure_restriction(&self) -> DisclosureRestriction {
        self.policy.disclosure_restriction
    }

    pub fn caveat_text(&self) -> Option<&str> {
        self.policy.caveat_text.as_deref()
    }

    pub fn matched_keywords(&self) -> &[String] {
        &self.matched_keywords
    }

    pub fn refuse(&self) -> bool {
        self.refuse
    }

    pub fn kind(&self) -> DirectiveKind {
        self.kind
    }

    /// Fixed decline or clarification text, when the directive is not a query.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn is_query(&self) -> bool {
        self.kind == DirectiveKind::Query
    }
}

// Audit.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditPriority {
    Normal,
    High,
}

/// One classification decision, kept for later review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub question_id: String,
    pub topic: Topic,
    pub policy_applied: Policy,
    pub priority: AuditPriority,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(question_id: impl Into<String>, topic: Topic, policy_applied: Policy) -> Self {
        // Privacy gate hits are reviewed first.
        let priority = if topic == Topic::PiiRequest { AuditPriority::High } else { AuditPriority::Normal };

        Self {
            question_id: question_id.into(),
            topic,
            policy_applied,
            priority,
            timestamp: Utc::now(),
        }
    }
}

// Tests.
