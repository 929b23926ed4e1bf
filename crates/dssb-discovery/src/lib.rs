//! DSSB Discovery - remote list fetching, validation and auto-refresh

pub mod browser;
pub mod candidates;
pub mod events;
pub mod refresh;
pub mod service;

#[cfg(test)]
mod testing;

pub use browser::*;
pub use candidates::*;
pub use events::*;
pub use refresh::*;
pub use service::*;
