//! Common validation utilities.

use validator::ValidationError;

/// Maximum length of a requester identifier.
pub const MAX_REQUESTER_ID_LENGTH: usize = 128;

/// Validates that a requester identifier is present and not just whitespace.
pub fn validate_requester_id(requester_id: &str) -> Result<(), ValidationError> {
    let trimmed = requester_id.trim();
    if trimmed.is_empty() {
        let mut err = ValidationError::new("requester_id_required");
        err.message = Some("requesterId is required".into());
        return Err(err);
    }
    if trimmed.len() > MAX_REQUESTER_ID_LENGTH {
        let mut err = ValidationError::new("requester_id_length");
        err.message = Some(
            format!(
                "requesterId must be at most {} characters",
                MAX_REQUESTER_ID_LENGTH
            )
            .into(),
        );
        return Err(err);
    }
    if trimmed.chars().any(char::is_control) {
        let mut err = ValidationError::new("requester_id_format");
        err.message = Some("requesterId must not contain control characters".into());
        return Err(err);
    }
    Ok(())
}

/// Validates that export filters, when present, are a JSON object.
pub fn validate_filters_object(filters: &serde_json::Value) -> Result<(), ValidationError> {
    if filters.is_object() {
        Ok(())
    } else {
        let mut err = ValidationError::new("filters_object");
        err.message = Some("filters must be an object".into());
        Err(err)
    }
}
