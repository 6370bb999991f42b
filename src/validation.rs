use crate::AppError;

pub const VALIDATION_CODE: &str = "VALIDATION/INVALID_FIELDS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: &'static str,
}

/// Every failing field of a form, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, thiserror::Error)]
#[error("{}", joined_messages(.errors))]
pub struct ValidationErrors {
    errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: &'static str, message: &'static str) {
        self.errors.push(FieldError { field, message });
    }

    /// Record `message` for `field` unless `ok` holds.
    pub fn check(&mut self, ok: bool, field: &'static str, message: &'static str) {
        if !ok {
            self.push(field, message);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    pub fn message_for(&self, field: &str) -> Option<&'static str> {
        self.errors
            .iter()
            .find(|e| e.field == field)
            .map(|e| e.message)
    }

    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

fn joined_messages(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.message)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<ValidationErrors> for AppError {
    fn from(errors: ValidationErrors) -> Self {
        let message = errors.to_string();
        AppError::new(VALIDATION_CODE, message)
            .with_contexts(errors.errors.into_iter().map(|e| (e.field, e.message)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_every_failure_in_order() {
        let mut errors = ValidationErrors::new();
        errors.check(false, "name", "Name is required");
        errors.check(true, "description", "Description is required");
        errors.check(false, "quantity", "Quantity must be at least 1");
        assert_eq!(errors.errors().len(), 2);
        assert_eq!(
            errors.to_string(),
            "Name is required; Quantity must be at least 1"
        );
        assert_eq!(errors.message_for("quantity"), Some("Quantity must be at least 1"));
        assert_eq!(errors.message_for("description"), None);
    }

    #[test]
    fn converts_to_app_error_with_field_context() {
        let mut errors = ValidationErrors::new();
        errors.push("email", "Invalid email address.");
        let app: AppError = errors.into();
        assert_eq!(app.code(), VALIDATION_CODE);
        assert_eq!(
            app.context().get("email"),
            Some(&"Invalid email address.".to_string())
        );
    }

    #[test]
    fn empty_errors_are_ok() {
        assert!(ValidationErrors::new().into_result().is_ok());
    }
}
