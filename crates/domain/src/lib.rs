pub mod appointments;
pub mod auth;
pub mod conflicts;
pub mod error;
pub mod geo;
pub mod identity;
pub mod locations;
pub mod ports;
pub mod transitions;
pub mod util;

pub type DomainResult<T> = Result<T, error::DomainError>;
