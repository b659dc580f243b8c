//! Crafty Controller API client.
//!
//! Crafty manages game server processes behind a small REST API. This crate
//! covers the subset the proxy needs:
//! - Logging in to obtain a bearer token
//! - Listing servers to resolve a server port to a server id
//! - Sending `start_server` / `stop_server` actions
//!
//! ## Usage
//!
//! ```ignore
//! use idlegate_crafty::{CraftyClient, CraftyConfig};
//!
//! let client = CraftyClient::new(CraftyConfig::new("https://crafty:8443", "admin", "secret"))?;
//! client.start_server(25565).await?;
//! ```

mod client;
mod error;
mod models;

pub use client::{CraftyClient, CraftyConfig, ServerAction};
pub use error::CraftyError;
pub use models::{LoginData, LoginPayload, LoginResponse, ServerId, ServerList, ServerSummary};
