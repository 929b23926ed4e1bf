//! DSSB Core - Core types and traits for the DSS server browser

pub mod config;
pub mod credentials;
pub mod error;
pub mod types;

pub use config::*;
pub use credentials::*;
pub use error::*;
pub use types::*;
