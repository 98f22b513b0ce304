//! Error types for source-mediator.

use thiserror::Error;

use crate::message::TypeKey;
use crate::pipeline::behaviors::ValidationErrors;

/// Boxed error returned by handler code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for all mediator operations.
#[derive(Debug, Error)]
pub enum MediatorError {
    /// A second handler was bound to a command or query type.
    #[error("duplicate handler for {message_type}: {handler} conflicts with {existing}")]
    Configuration {
        message_type: &'static str,
        handler: &'static str,
        existing: &'static str,
    },

    /// No binding exists for the message type (and expected response type).
    #[error("no handler registered for {message_type}{}", returning(.response_type))]
    NoHandler {
        message_type: &'static str,
        response_type: Option<&'static str>,
    },

    /// A handler produced no value, or a value of the wrong type.
    #[error("handler for {message_type} did not produce a {response_type}")]
    InvalidResult {
        message_type: &'static str,
        response_type: &'static str,
    },

    /// A handler or behavior failed.
    #[error("handler for {message_type} failed: {source}")]
    HandlerExecution {
        message_type: &'static str,
        #[source]
        source: BoxError,
    },

    /// One or more notification handlers failed.
    #[error(transparent)]
    AggregateNotification(#[from] AggregateNotificationError),

    /// The call was cancelled before it completed.
    #[error("dispatch of {message_type} was cancelled")]
    Cancelled { message_type: &'static str },

    /// The resolver could not supply an instance.
    #[error("could not resolve an instance of {type_name}")]
    Unresolved { type_name: &'static str },

    /// A thunk received a message of another concrete type.
    #[error("handler expected {expected} but received {actual}")]
    MessageMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// Request validation failed before the handler ran.
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    /// Cache store or cache payload failure.
    #[error("cache error for key '{key}': {message}")]
    Cache { key: String, message: String },

    /// Configuration could not be parsed or is out of range.
    #[error("invalid configuration: {0}")]
    Config(String),
}

fn returning(response_type: &Option<&'static str>) -> String {
    match response_type {
        Some(name) => format!(" returning {name}"),
        None => String::new(),
    }
}

impl MediatorError {
    /// Wrap a handler failure with the originating message type.
    ///
    /// Errors that already are a `MediatorError` (for example a nested send
    /// that was cancelled) pass through unchanged.
    pub fn handler(message_type: TypeKey, error: BoxError) -> Self {
        match error.downcast::<MediatorError>() {
            Ok(inner) => *inner,
            Err(source) => MediatorError::HandlerExecution {
                message_type: message_type.name(),
                source,
            },
        }
    }

    /// Cancellation error for the given message type.
    pub fn cancelled(message_type: TypeKey) -> Self {
        MediatorError::Cancelled {
            message_type: message_type.name(),
        }
    }

    /// Build a cache error from any displayable failure.
    pub fn cache(key: &str, message: impl std::fmt::Display) -> Self {
        MediatorError::Cache {
            key: key.to_string(),
            message: message.to_string(),
        }
    }

    /// Returns `true` for [`MediatorError::Cancelled`].
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, MediatorError::Cancelled { .. })
    }

    /// Returns `true` when running the handler again may succeed.
    ///
    /// Only handler failures and cache failures qualify; configuration,
    /// routing, validation and cancellation errors are deterministic.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MediatorError::HandlerExecution { .. } | MediatorError::Cache { .. }
        )
    }
}

/// One failed notification handler inside an [`AggregateNotificationError`].
#[derive(Debug)]
pub struct NotificationFailure {
    /// Registration index of the handler for this notification type.
    pub index: usize,
    /// Type name of the handler (or closure) that failed.
    pub handler: &'static str,
    /// The captured failure.
    pub error: MediatorError,
}

/// Every failure captured while publishing one notification.
#[derive(Debug, Error)]
#[error(
    "one or more errors occurred while publishing notification '{notification}' ({} of {attempted} handlers failed)",
    .failures.len()
)]
pub struct AggregateNotificationError {
    notification: &'static str,
    attempted: usize,
    failures: Vec<NotificationFailure>,
}

impl AggregateNotificationError {
    /// Create an aggregate; failures are kept in registration order.
    pub fn new(
        notification: &'static str,
        attempted: usize,
        mut failures: Vec<NotificationFailure>,
    ) -> Self {
        failures.sort_by_key(|f| f.index);
        Self {
            notification,
            attempted,
            failures,
        }
    }

    /// Type name of the published notification.
    pub fn notification(&self) -> &'static str {
        self.notification
    }

    /// Number of handlers that were invoked.
    pub fn attempted(&self) -> usize {
        self.attempted
    }

    /// The captured failures.
    pub fn failures(&self) -> &[NotificationFailure] {
        &self.failures
    }

    /// Number of failed handlers.
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// Always `false` for an aggregate produced by the publisher.
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Names of the handlers that failed, in registration order.
    pub fn failed_handlers(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.failures.iter().map(|f| f.handler)
    }

    /// Consume the aggregate and return the failures.
    pub fn into_failures(self) -> Vec<NotificationFailure> {
        self.failures
    }
}

/// Result type alias using MediatorError.
pub type Result<T> = std::result::Result<T, MediatorError>;

/// Result type for handler functions.
pub type HandlerResult<T = ()> = std::result::Result<T, BoxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("disk full")]
    struct DiskFull;

    struct Ping;

    #[test]
    fn test_no_handler_message_names_types() {
        let err = MediatorError::NoHandler {
            message_type: "app::GetUser",
            response_type: Some("app::User"),
        };
        assert_eq!(
            err.to_string(),
            "no handler registered for app::GetUser returning app::User"
        );

        let err = MediatorError::NoHandler {
            message_type: "app::DeleteUser",
            response_type: None,
        };
        assert_eq!(err.to_string(), "no handler registered for app::DeleteUser");
    }

    #[test]
    fn test_handler_wraps_foreign_error() {
        let err = MediatorError::handler(TypeKey::of::<Ping>(), Box::new(DiskFull));
        match &err {
            MediatorError::HandlerExecution { message_type, source } => {
                assert!(message_type.ends_with("Ping"));
                assert_eq!(source.to_string(), "disk full");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_retryable());
    }

    #[test]
    fn test_handler_passes_mediator_error_through() {
        let inner = MediatorError::cancelled(TypeKey::of::<Ping>());
        let err = MediatorError::handler(TypeKey::of::<Ping>(), Box::new(inner));
        assert!(err.is_cancelled());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_aggregate_sorts_failures_by_index() {
        let failures = vec![
            NotificationFailure {
                index: 2,
                handler: "h3",
                error: MediatorError::Config("x".into()),
            },
            NotificationFailure {
                index: 0,
                handler: "h1",
                error: MediatorError::Config("y".into()),
            },
        ];
        let agg = AggregateNotificationError::new("OrderPlaced", 3, failures);

        assert_eq!(agg.len(), 2);
        assert_eq!(agg.attempted(), 3);
        assert_eq!(agg.failed_handlers().collect::<Vec<_>>(), vec!["h1", "h3"]);
        assert!(agg.to_string().contains("2 of 3 handlers failed"));
    }
}
