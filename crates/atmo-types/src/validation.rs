//! User input validation errors

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single rejected form field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Rejected user input. Carries every offending field so the caller can
/// render all messages at once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub errors: Vec<FieldError>,
}

impl ValidationError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-field error
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut error = Self::new();
        error.push(field, message);
        error
    }

    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }

    /// `Ok(())` when nothing was collected
    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for ValidationError {}

/// Identifiers are 1-100 word characters or hyphens
pub(crate) fn check_identifier(errors: &mut ValidationError, identifier: &str) {
    if identifier.is_empty() || identifier.chars().count() > 100 {
        errors.push("identifier", "must be between 1 and 100 characters long");
    } else if !identifier
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    {
        errors.push(
            "identifier",
            "may only contain letters, digits, underscores and hyphens",
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_rules() {
        let mut errors = ValidationError::new();
        check_identifier(&mut errors, "jdoe-telemetry_01");
        assert!(errors.is_empty());

        check_identifier(&mut errors, "");
        check_identifier(&mut errors, "has space");
        check_identifier(&mut errors, &"a".repeat(101));
        assert_eq!(errors.errors.len(), 3);
        assert!(errors.has_field("identifier"));
    }

    #[test]
    fn test_display_joins_fields() {
        let mut errors = ValidationError::field("size", "too big");
        errors.push("identifier", "empty");
        assert_eq!(errors.to_string(), "size: too big; identifier: empty");
        assert!(errors.into_result().is_err());
        assert!(ValidationError::new().into_result().is_ok());
    }
}
