//! 💀 Errors: the taxonomy of sadness.
//!
//! 🎬 Most of the crate speaks `anyhow` with a generous helping of `.context(...)`.
//! The errors in here are the ones a caller needs to tell apart: bad config,
//! a server that never picked up the phone, and a server that picked up and said no.
//!
//! 🧠 Knowledge graph:
//! - `ConfigurationError`: found before any network call, reported as a list
//! - `FeedError::Connectivity`: the request never landed
//! - `FeedError::BackendStatus`: the request landed and came back with a 4xx/5xx
//! - A hit with no usable value is NOT an error. It just quietly leaves the party. 🦆

use thiserror::Error;

/// 📡 Prefix for every "we talked to the server and it hated us" message.
const FAILED_TO_CONNECT: &str = "Failed to connect. The following error occurred:";

/// 🔧 One missing (or broken) configuration knob.
///
/// The messages are user-facing and match the labels an operator
/// sees when filling in the feed settings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("Please provide a \"Server URL\"")]
    MissingServerUrl,
    #[error("Please provide a \"Source Indicator Value\"")]
    MissingSourceValue,
    #[error("Please provide a \"Source Indicator Type\" or \"Default Indicator Type\"")]
    MissingIndicatorType,
    #[error("Please provide a \"Time Method\"")]
    MissingTimeMethod,
    #[error("Please provide a \"First Fetch Time\"")]
    MissingFirstFetchTime,
    #[error("Invalid \"First Fetch Time\" '{value}': {reason}")]
    InvalidFirstFetchTime { value: String, reason: String },
}

/// 💀 The fatal classes. Any of these aborts the whole invocation, no partial credit.
#[derive(Debug, Error)]
pub enum FeedError {
    /// 🔧 One or more knobs are missing. Nothing was sent anywhere.
    #[error("{}", join_lines(.0))]
    Configuration(Vec<ConfigurationError>),

    /// 🔌 The backend could not be reached at all (DNS, refused, TLS, timeout...).
    #[error("Failed to connect. Check Server URL field and port number.\nError message: {message}")]
    Connectivity { message: String },

    /// 📡 The backend answered with an error status.
    #[error("{message}")]
    BackendStatus { status: u16, message: String },
}

fn join_lines(errors: &[ConfigurationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// 📜 Canonical causes for the status codes we have seen often enough to name.
pub fn known_status_cause(status: u16) -> Option<&'static str> {
    match status {
        400 => Some("400 Bad Request - Incorrect or invalid parameters"),
        401 => Some("401 Unauthorized - Incorrect or invalid username or password"),
        403 => Some("403 Forbidden - The account does not support performing this task"),
        404 => Some("404 Not Found - Elasticsearch server was not found"),
        408 => Some("408 Timeout - Check port number or Elasticsearch server credentials"),
        410 => Some("410 Gone - Elasticsearch server no longer exists in the service"),
        500 => Some("500 Internal Server Error - Internal error"),
        503 => Some("503 Service Unavailable"),
        _ => None,
    }
}

impl FeedError {
    /// 🎯 Build a `BackendStatus` error. Known codes get the canonical cause,
    /// everything else gets the raw error text the HTTP layer produced.
    pub fn from_status(status: u16, raw_error: impl Into<String>) -> Self {
        let cause = match known_status_cause(status) {
            Some(cause) => cause.to_string(),
            None => raw_error.into(),
        };
        FeedError::BackendStatus {
            status,
            message: format!("{FAILED_TO_CONNECT} {cause}"),
        }
    }

    /// 🔌 Wrap a transport-level failure.
    pub fn connectivity(err: impl std::fmt::Display) -> Self {
        FeedError::Connectivity {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_401_gets_the_canonical_password_speech() {
        let err = FeedError::from_status(401, "whatever reqwest said");
        assert_eq!(
            err.to_string(),
            "Failed to connect. The following error occurred: 401 Unauthorized - Incorrect or invalid username or password"
        );
    }

    #[test]
    fn the_one_where_a_teapot_speaks_for_itself() {
        let err = FeedError::from_status(418, "HTTP status client error (418 I'm a teapot)");
        assert_eq!(
            err.to_string(),
            "Failed to connect. The following error occurred: HTTP status client error (418 I'm a teapot)"
        );
        assert!(matches!(err, FeedError::BackendStatus { status: 418, .. }));
    }

    #[test]
    fn the_one_where_connection_refused_points_at_the_url_field() {
        let err = FeedError::connectivity("tcp connect error: Connection refused");
        let msg = err.to_string();
        assert!(msg.starts_with("Failed to connect. Check Server URL field and port number."));
        assert!(msg.contains("Connection refused"));
    }

    #[test]
    fn the_one_where_config_errors_line_up_one_per_line() {
        let err = FeedError::Configuration(vec![
            ConfigurationError::MissingSourceValue,
            ConfigurationError::MissingTimeMethod,
        ]);
        assert_eq!(
            err.to_string(),
            "Please provide a \"Source Indicator Value\"\nPlease provide a \"Time Method\""
        );
    }
}
