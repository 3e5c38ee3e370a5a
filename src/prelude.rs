pub use crate::{
    base::{
        config::Config,
        types::{CountingKey, Directive, DirectiveKind, DisclosureRestriction, Err, Policy, Question, RequiredJoin, Res, Topic, Void},
    },
    normalizer::Normalizer,
    rules::RuleTable,
    runtime::{Answer, Reply, Runtime},
};
pub use anyhow::anyhow;
pub use tracing::{debug, error, info, instrument, warn};
