//! # mdtsdb-client
//!
//! Client library for the mdtsdb time-series service.
//!
//! This crate provides:
//! - Blocking HTTP transport with signed requests and bounded 307 handling
//! - High-level API for data, query, stored-result and admin operations
//! - OAuth2 client-credentials tokens with one refresh on auth expiry
//! - WebSocket target, header and frame builders
//! - YAML/environment configuration

pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod token;
pub mod transport;
pub mod ws;

pub use client::{AppKeyOptions, Client, QueryOptions};
pub use config::{ClientConfig, ConfigError, CredentialsConfig, EndpointConfig, TransportConfig};
pub use credentials::{CredentialState, Credentials};
pub use error::ClientError;
pub use token::{AccessToken, TokenFlow};
pub use transport::{BodyStrategy, HttpExchange, HttpReply, HttpRequest, ReqwestExchange, Transport};
pub use ws::WebSocketApi;
