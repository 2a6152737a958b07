//! Core business logic abstractions

pub mod config;
pub mod error;
pub mod log;
pub mod rate;

// Re-export main types for cleaner imports
pub use error::{FetchError, RateError, StoreError};
pub use rate::{LOCAL_CURRENCY, RateObservation, RateProvider, SUPPORTED_CURRENCIES};
