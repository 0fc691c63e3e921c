//! Topic name and filter validation
//!
//! Publish topics are concrete names; subscription topics are filters that may
//! use the `+` and `#` wildcards. Both are checked before anything is handed
//! to the transport so malformed topics fail locally with a typed error.

use thiserror::Error;

/// Longest topic the MQTT length prefix can encode
pub const MAX_TOPIC_LEN: usize = 65_535;

/// Default topics used by the ItemReminder device family
pub const DEFAULT_REMINDER_TOPIC: &str = "itemreminder/notification";
pub const DEFAULT_STATUS_TOPIC: &str = "itemreminder/status";
pub const DEFAULT_COMMAND_TOPIC: &str = "itemreminder/command";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TopicError {
    #[error("Topic cannot be empty")]
    Empty,
    #[error("Topic exceeds {MAX_TOPIC_LEN} bytes")]
    TooLong,
    #[error("Topic contains a NUL character")]
    NulCharacter,
    #[error("Wildcards are not allowed in publish topic '{0}'")]
    WildcardInName(String),
    #[error("Invalid wildcard placement in filter '{0}'")]
    InvalidWildcard(String),
}

fn validate_common(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(TopicError::TooLong);
    }
    if topic.contains('\0') {
        return Err(TopicError::NulCharacter);
    }
    Ok(())
}

/// Validate a concrete topic used for publishing
pub fn validate_topic_name(topic: &str) -> Result<(), TopicError> {
    validate_common(topic)?;
    if topic.contains(['+', '#']) {
        return Err(TopicError::WildcardInName(topic.to_string()));
    }
    Ok(())
}

/// Validate a subscription filter
///
/// `#` must occupy the whole last level, `+` must occupy a whole level.
pub fn validate_topic_filter(filter: &str) -> Result<(), TopicError> {
    validate_common(filter)?;

    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;
    for (index, level) in levels.iter().enumerate() {
        let bad_multi = level.contains('#') && (*level != "#" || index != last);
        let bad_single = level.contains('+') && *level != "+";
        if bad_multi || bad_single {
            return Err(TopicError::InvalidWildcard(filter.to_string()));
        }
    }
    Ok(())
}

/// Whether a concrete topic matches a subscription filter
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
