//! Request validation.
//!
//! Requests implement [`Validate`], usually with the [`Validator`] rule
//! builder, and [`ValidationBehavior`] rejects invalid ones before their
//! handler runs.
//!
//! # Example
//!
//! ```ignore
//! impl Validate for CreateColor {
//!     fn validate(&self) -> Result<(), ValidationErrors> {
//!         Validator::new()
//!             .required("Name", &self.name)
//!             .max_length("Name", &self.name, 50)
//!             .hex_color("Hex", &self.hex)
//!             .finish()
//!     }
//! }
//! ```

use std::fmt;

use thiserror::Error;

use crate::error::Result;
use crate::handler::DispatchContext;
use crate::message::Request;
use crate::pipeline::{Next, PipelineBehavior};

/// One failed rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// All failed rules of one request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Validation error occurred: {}", join(.errors))]
pub struct ValidationErrors {
    errors: Vec<FieldError>,
}

fn join(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationErrors {
    pub fn new(errors: Vec<FieldError>) -> Self {
        Self { errors }
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    /// Messages reported for `field`.
    pub fn for_field<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.errors
            .iter()
            .filter(move |e| e.field == field)
            .map(|e| e.message.as_str())
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Implemented by requests that can check themselves.
pub trait Validate {
    fn validate(&self) -> std::result::Result<(), ValidationErrors>;
}

/// Collects rule failures.
#[derive(Debug, Default)]
#[must_use]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    fn fail(mut self, field: &str, message: String) -> Self {
        self.errors.push(FieldError {
            field: field.to_string(),
            message,
        });
        self
    }

    /// Non-blank string.
    pub fn required(self, field: &str, value: &str) -> Self {
        if value.trim().is_empty() {
            return self.fail(field, format!("{field} is required."));
        }
        self
    }

    /// Present optional value.
    pub fn required_some<T>(self, field: &str, value: Option<&T>) -> Self {
        if value.is_none() {
            return self.fail(field, format!("{field} is required."));
        }
        self
    }

    pub fn not_zero<T: PartialEq + Default>(self, field: &str, value: T) -> Self {
        if value == T::default() {
            return self.fail(field, format!("{field} can not be zero."));
        }
        self
    }

    pub fn greater_than_zero<T: PartialOrd + Default>(self, field: &str, value: T) -> Self {
        if value <= T::default() {
            return self.fail(field, format!("{field} should be greater than zero."));
        }
        self
    }

    /// At most `max` characters.
    pub fn max_length(self, field: &str, value: &str, max: usize) -> Self {
        if value.chars().count() > max {
            return self.fail(field, format!("{field} must not exceed {max} characters."));
        }
        self
    }

    pub fn not_empty<T>(self, field: &str, values: &[T]) -> Self {
        if values.is_empty() {
            return self.fail(field, format!("{field} can not be empty."));
        }
        self
    }

    /// Absolute `http` or `https` URL with a host.
    pub fn url(self, field: &str, value: &str) -> Self {
        if !is_http_url(value) {
            return self.fail(field, format!("{field} is not a valid URL."));
        }
        self
    }

    /// Color in the form `#RRGGBB`.
    pub fn hex_color(self, field: &str, value: &str) -> Self {
        if !is_hex_color(value) {
            return self.fail(
                field,
                "Color must be a valid hexadecimal code in the form '#RRGGBB'.".to_string(),
            );
        }
        self
    }

    /// Arbitrary rule.
    pub fn custom(self, field: &str, ok: bool, message: impl Into<String>) -> Self {
        if !ok {
            return self.fail(field, message.into());
        }
        self
    }

    pub fn finish(self) -> std::result::Result<(), ValidationErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors::new(self.errors))
        }
    }
}

fn is_http_url(value: &str) -> bool {
    let rest = match value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"))
    {
        Some(rest) => rest,
        None => return false,
    };
    let host = rest.split(['/', '?', '#']).next().unwrap_or("");
    let host = host.rsplit('@').next().unwrap_or("");
    let name = host.split(':').next().unwrap_or("");
    !name.is_empty()
        && !value.chars().any(char::is_whitespace)
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
}

fn is_hex_color(value: &str) -> bool {
    match value.strip_prefix('#') {
        Some(hex) => hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

/// Rejects invalid requests with [`MediatorError::Validation`](crate::MediatorError::Validation).
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationBehavior;

impl<R> PipelineBehavior<R> for ValidationBehavior
where
    R: Request + Validate,
{
    async fn handle(
        &self,
        request: &R,
        next: Next<R::Response>,
        ctx: &DispatchContext,
    ) -> Result<R::Response> {
        if let Err(errors) = request.validate() {
            tracing::debug!(
                target: "source_mediator::dispatch",
                call_id = ctx.call_id(),
                message = ctx.message_type().name(),
                failures = errors.len(),
                "Request failed validation"
            );
            return Err(errors.into());
        }
        next.run().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_input_passes() {
        let result = Validator::new()
            .required("Name", "Teal")
            .greater_than_zero("Id", 3)
            .not_zero("Weight", 0.5)
            .max_length("Name", "Teal", 10)
            .not_empty("Tags", &["a"])
            .url("Homepage", "https://example.com/colors?x=1")
            .hex_color("Hex", "#00fFaA")
            .finish();
        assert!(result.is_ok());
    }

    #[test]
    fn test_collects_every_failure() {
        let errors = Validator::new()
            .required("Name", "   ")
            .not_zero("Id", 0)
            .greater_than_zero("Price", -1)
            .not_empty::<u8>("Tags", &[])
            .url("Homepage", "ftp://example.com")
            .hex_color("Hex", "#12345")
            .finish()
            .unwrap_err();

        assert_eq!(errors.len(), 6);
        assert_eq!(errors.for_field("Name").collect::<Vec<_>>(), vec!["Name is required."]);
        assert_eq!(errors.for_field("Id").collect::<Vec<_>>(), vec!["Id can not be zero."]);
        assert!(errors.to_string().starts_with("Validation error occurred"));
    }

    #[test]
    fn test_url_rules() {
        assert!(is_http_url("http://localhost:8080/x"));
        assert!(!is_http_url("https://"));
        assert!(!is_http_url("https://exa mple.com"));
        assert!(!is_http_url("example.com"));
    }

    #[test]
    fn test_hex_color_rules() {
        assert!(is_hex_color("#A0B1C2"));
        assert!(!is_hex_color("A0B1C2"));
        assert!(!is_hex_color("#A0B1CZ"));
        assert!(!is_hex_color("#A0B1C2FF"));
    }

    #[test]
    fn test_max_length_counts_chars() {
        assert!(Validator::new().max_length("Name", "ééé", 3).finish().is_ok());
        assert!(Validator::new().max_length("Name", "éééé", 3).finish().is_err());
    }
}
