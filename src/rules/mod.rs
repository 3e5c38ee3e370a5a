//! The rule table: ordered topic rules, counting-key qualifiers, discount
//! scope terms, and the per-topic policies.
//!
//! The table is a versioned TOML document, loaded once at startup and
//! immutable afterwards. A table that breaks any of the privacy or counting
//! invariants is rejected outright; startup must abort rather than run with it.

use std::{
    collections::{HashMap, HashSet},
    path::Path,
};

use anyhow::{Context, anyhow};
use regex::Regex;
use serde::Deserialize;
use tracing::{info, instrument};

use crate::base::{
    config::Config,
    types::{CountingKey, Country, DisclosureRestriction, Policy, RequiredJoin, Res, Topic, normalize_text},
};

/// The table compiled into the binary.
pub const DEFAULT_RULE_TABLE: &str = include_str!("default.toml");

// Document shape.

#[derive(Debug, Deserialize)]
struct RuleTableDocument {
    version: String,
    rules: Vec<RuleEntry>,
    #[serde(default)]
    qualifiers: Vec<QualifierEntry>,
    scope: ScopeEntry,
    policies: Vec<PolicyEntry>,
}

#[derive(Debug, Deserialize)]
struct RuleEntry {
    topic: Topic,
    keywords: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct QualifierEntry {
    counting_key: CountingKey,
    phrases: Vec<String>,
    #[serde(default)]
    caveat_text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScopeEntry {
    discount_unsupported: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PolicyEntry {
    topic: Topic,
    counting_key: CountingKey,
    required_join: RequiredJoin,
    disclosure_restriction: DisclosureRestriction,
    #[serde(default)]
    caveat_text: Option<String>,
}

// Matchers.

/// Word-bounded matcher over a set of keywords or phrases.
#[derive(Debug, Clone)]
pub struct KeywordMatcher {
    regex: Regex,
}

impl KeywordMatcher {
    /// Compile a keyword list into a single alternation, longest keyword first.
    pub fn new(keywords: &[String]) -> Res<Self> {
        let mut normalized = keywords.iter().map(|k| normalize_text(k)).collect::<Vec<_>>();

        if normalized.is_empty() {
            return Err(anyhow!("Keyword list must not be empty."));
        }

        for keyword in &normalized {
            let starts_on_word = keyword.chars().next().is_some_and(is_word_char);
            let ends_on_word = keyword.chars().last().is_some_and(is_word_char);

            if !starts_on_word || !ends_on_word {
                return Err(anyhow!("Keyword `{keyword}` must start and end with a letter or digit."));
            }
        }

        normalized.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        normalized.dedup();

        let alternation = normalized.iter().map(|k| regex::escape(k)).collect::<Vec<_>>().join("|");
        let regex = Regex::new(&format!(r"\b(?:{alternation})\b"))?;

        Ok(Self { regex })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// Distinct matches, in order of first appearance.
    pub fn find_all(&self, text: &str) -> Vec<String> {
        let mut seen = HashSet::new();

        self.regex
            .find_iter(text)
            .map(|m| m.as_str().to_string())
            .filter(|m| seen.insert(m.clone()))
            .collect()
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// One entry of the ordered topic list.
#[derive(Debug, Clone)]
pub struct TopicRule {
    pub topic: Topic,
    pub matcher: KeywordMatcher,
}

/// An explicit phrase that forces a counting key, e.g. "distinct users by id".
///
/// Its caveat replaces the topic caveat whenever the forced key differs from
/// the topic default.
#[derive(Debug, Clone)]
pub struct Qualifier {
    pub counting_key: CountingKey,
    pub matcher: KeywordMatcher,
    pub caveat_text: Option<String>,
}

// Table.

/// Compiled, validated rule table.
#[derive(Debug, Clone)]
pub struct RuleTable {
    version: String,
    rules: Vec<TopicRule>,
    qualifiers: Vec<Qualifier>,
    discount_scope: KeywordMatcher,
    policies: HashMap<Topic, Policy>,
}

impl RuleTable {
    /// Load the table named by the config, or the built-in one.
    #[instrument(skip_all)]
    pub fn load(config: &Config) -> Res<Self> {
        let table = match &config.rule_table_path {
            Some(path) => Self::from_path(Path::new(path))?,
            None => Self::builtin()?,
        };

        info!("Loaded rule table version `{}` with {} rules.", table.version, table.rules.len());

        Ok(table)
    }

    pub fn builtin() -> Res<Self> {
        Self::from_toml_str(DEFAULT_RULE_TABLE).context("Built-in rule table is invalid.")
    }

    pub fn from_path(path: &Path) -> Res<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read rule table `{}`.", path.display()))?;

        Self::from_toml_str(&text).with_context(|| format!("Rule table `{}` is invalid.", path.display()))
    }

    pub fn from_toml_str(text: &str) -> Res<Self> {
        let document: RuleTableDocument = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;

        Self::compile(document)
    }

    fn compile(document: RuleTableDocument) -> Res<Self> {
        if document.version.trim().is_empty() {
            return Err(anyhow!("Rule table version must not be empty."));
        }

        // Topic rules.

        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(document.rules.len());

        for entry in document.rules {
            if entry.topic == Topic::Unknown {
                return Err(anyhow!("`unknown` is the fallback topic and cannot have a rule."));
            }

            if !seen.insert(entry.topic) {
                return Err(anyhow!("Topic `{}` has more than one rule.", entry.topic));
            }

            let matcher = KeywordMatcher::new(&entry.keywords).with_context(|| format!("Invalid keywords for topic `{}`.", entry.topic))?;
            rules.push(TopicRule { topic: entry.topic, matcher });
        }

        for topic in Topic::ALL.into_iter().filter(|t| *t != Topic::Unknown) {
            if !seen.contains(&topic) {
                return Err(anyhow!("Topic `{topic}` has no rule."));
            }
        }

        if rules.first().map(|r| r.topic) != Some(Topic::PiiRequest) {
            return Err(anyhow!("The `pii_request` rule must be evaluated first."));
        }

        // Qualifiers.

        let qualifiers = document
            .qualifiers
            .into_iter()
            .map(|entry| {
                if entry.counting_key == CountingKey::None {
                    return Err(anyhow!("A qualifier must force a concrete counting key."));
                }

                Ok(Qualifier {
                    counting_key: entry.counting_key,
                    matcher: KeywordMatcher::new(&entry.phrases).context("Invalid qualifier phrases.")?,
                    caveat_text: entry.caveat_text,
                })
            })
            .collect::<Res<Vec<_>>>()?;

        let discount_scope = KeywordMatcher::new(&document.scope.discount_unsupported).context("Invalid discount scope terms.")?;

        // Policies.

        let mut policies = HashMap::new();

        for entry in document.policies {
            if entry.topic == Topic::Unknown {
                return Err(anyhow!("`unknown` always resolves to a clarification and cannot have a policy."));
            }

            let policy = Policy {
                counting_key: entry.counting_key,
                required_join: entry.required_join,
                disclosure_restriction: entry.disclosure_restriction,
                caveat_text: entry.caveat_text,
                unsupported_scope: false,
            };

            if policies.insert(entry.topic, policy).is_some() {
                return Err(anyhow!("Topic `{}` has more than one policy.", entry.topic));
            }
        }

        for topic in Topic::ALL.into_iter().filter(|t| *t != Topic::Unknown) {
            if !policies.contains_key(&topic) {
                return Err(anyhow!("Topic `{topic}` has no policy."));
            }
        }

        validate_invariants(&policies)?;

        Ok(Self {
            version: document.version,
            rules,
            qualifiers,
            discount_scope,
            policies,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Topic rules in evaluation order.
    pub fn rules(&self) -> &[TopicRule] {
        &self.rules
    }

    /// The rule for a topic; `unknown` has none.
    pub fn rule(&self, topic: Topic) -> Option<&TopicRule> {
        self.rules.iter().find(|r| r.topic == topic)
    }

    pub fn qualifiers(&self) -> &[Qualifier] {
        &self.qualifiers
    }

    /// Terms that put a discount question outside the Swedish-only view.
    pub fn discount_scope(&self) -> &KeywordMatcher {
        &self.discount_scope
    }

    /// The configured policy for a topic; `unknown` has none.
    pub fn policy(&self, topic: Topic) -> Option<&Policy> {
        self.policies.get(&topic)
    }
}

/// The compliance and counting invariants no table may override.
fn validate_invariants(policies: &HashMap<Topic, Policy>) -> Res<()> {
    let policy = |topic: Topic| policies.get(&topic).ok_or_else(|| anyhow!("Topic `{topic}` has no policy."));

    let pii = policy(Topic::PiiRequest)?;
    if pii.disclosure_restriction != DisclosureRestriction::DenyPii || pii.counting_key != CountingKey::None {
        return Err(anyhow!("The `pii_request` policy must be `deny_pii` with counting key `none`."));
    }

    for (topic, p) in policies.iter().filter(|(t, _)| **t != Topic::PiiRequest) {
        if p.disclosure_restriction == DisclosureRestriction::DenyPii {
            return Err(anyhow!("Only `pii_request` may use `deny_pii`, found on `{topic}`."));
        }

        if p.counting_key == CountingKey::None {
            return Err(anyhow!("Topic `{topic}` must name a counting key."));
        }
    }

    if policy(Topic::Discount)?.disclosure_restriction != DisclosureRestriction::CountryRestricted(Country::Se) {
        return Err(anyhow!("The `discount` policy must be `country_restricted(SE)`."));
    }

    if policy(Topic::Signings)?.counting_key != CountingKey::ContractId {
        return Err(anyhow!("The `signings` policy must count by CONTRACT_ID."));
    }

    if policy(Topic::Device)?.counting_key != CountingKey::UserId {
        return Err(anyhow!("The `device` policy must count by USER_ID."));
    }

    Ok(())
}

// Tests.
