//! # colink-client
//!
//! Client library for colink collaboration servers.
//!
//! This crate provides:
//! - A persistent TLS connection with automatic reconnection
//! - A single ordered writer fed by a non-blocking request queue
//! - Routing of server responses to session events or one-shot replies
//! - A session cache that replays the login after a reconnect

pub mod client;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod reader;
pub mod router;
pub mod session;
pub mod stream;
pub mod tls;

pub use client::{Client, PendingReply, Reply};
pub use config::{Config, ConfigError};
pub use connection::{
    Connection, ConnectionConfig, ConnectionState, ReconnectPolicy, TlsClientConfig, TrustPolicy,
};
pub use dispatch::{DispatchQueue, OutboundRequest};
pub use error::ClientError;
pub use reader::FrameReader;
pub use router::{Router, SessionEvent};
pub use session::{Credentials, SessionCache};
