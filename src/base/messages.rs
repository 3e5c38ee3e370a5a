//! Fixed reply texts.
//!
//! These are compliance texts. They are returned verbatim and are never
//! read from the rule table or the config layer.

/// Returned for any request for personal data or customer exports.
pub const DECLINE_MESSAGE: &str = "I can't share personal information about customers, such as names, email addresses, phone numbers or home addresses, and I can't export customer lists. If you need this data for a legitimate purpose, please contact a human analyst on the data team.";

/// Returned when a discount question reaches outside the Swedish market.
pub const UNSUPPORTED_SCOPE_MESSAGE: &str = "Discount data is only available for Sweden (SE), so I can't answer questions about Finland or compare discounts across countries. Please narrow the question to Sweden, or contact a human analyst on the data team.";

/// Returned when the question matched no known topic.
pub const CLARIFICATION_MESSAGE: &str = "I'm not sure what you'd like to count. Could you rephrase, mentioning for example signings, churn, operational contracts, channels, discounts, payment methods or devices, and the time period you're interested in?";
