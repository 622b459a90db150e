#![forbid(unsafe_code)]

pub mod analytics;
pub mod error;
pub mod model;
pub mod progress;
pub mod time;

pub use error::ValidationError;
pub use time::Clock;
