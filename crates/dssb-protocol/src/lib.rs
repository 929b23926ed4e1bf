//! DSSB Protocol - client for the DSS game-server listing protocol
//!
//! - `codec`: frame layout and message encoding
//! - `tls`: inline TLS upgrade for servers that ask for it
//! - `client`: one greeting + listing round trip per query
//! - `icon`: icon format sniffing

pub mod client;
pub mod codec;
pub mod icon;
pub mod tls;

pub use client::{DssClient, ServerQuery};
pub use codec::Greeting;
pub use icon::{icon_file_name, IconFormat};
