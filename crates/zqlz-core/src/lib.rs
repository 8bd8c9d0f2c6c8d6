//! ZQLZ Core - Shared types for connection sync
//!
//! This crate provides the types every other sync crate depends on:
//!
//! - `ConnectionRecord` - A saved connection and its wire forms
//! - `ConnectionUrl` - Round-trip-safe connection string codec
//! - `DatabaseType` / `SyncMode` - Connection classification and password policy
//! - `ZqlzError` - The shared error type

pub mod connection_string;
mod error;
mod record;
mod types;

pub use connection_string::{ConnectionUrl, SslConfig, SslOptions};
pub use error::*;
pub use record::*;
pub use types::*;
