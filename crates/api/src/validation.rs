use validator::Validate;

use crate::error::ApiError;

/// Runs the payload's derive(Validate) rules and folds any violations into a
/// single validation error message.
pub fn validate<T: Validate>(payload: &T) -> Result<(), ApiError> {
    payload
        .validate()
        .map_err(|err| ApiError::Validation(err.to_string()))
}
