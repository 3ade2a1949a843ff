mod appointments;
mod locations;

pub use appointments::*;
pub use locations::*;
