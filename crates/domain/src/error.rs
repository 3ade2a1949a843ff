use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found")]
    NotFound,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("{action} is not allowed while the appointment is {from}")]
    InvalidTransition { from: String, action: &'static str },
    #[error("counter-offer limit of {max} reached")]
    CounterOfferLimit { max: u32 },
    #[error("check-in opens in {minutes_until_open} minutes")]
    CheckInTooEarly { minutes_until_open: i64 },
    #[error("check-in window closed {minutes_since_close} minutes ago")]
    CheckInTooLate { minutes_since_close: i64 },
    #[error("{distance_meters:.0}m from the meeting point; check-in allowed within {radius_meters:.0}m")]
    TooFarFromVenue {
        distance_meters: f64,
        radius_meters: f64,
    },
    #[error("conflict")]
    Conflict,
    #[error("internal error: {0}")]
    Internal(String),
}
