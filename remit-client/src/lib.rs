//! # Remit Client
//!
//! Request execution engine for the remittance API. Every API method builds
//! an [`Operation`], asks the [`Client`] for a [`Request`] and sends it.
//!
//! ## Features
//!
//! - **Retry with Backoff**: exponential backoff with jitter, capped, with a
//!   pluggable [`Retryer`]
//! - **Replayable Bodies**: the request payload is sent from its start on
//!   every attempt
//! - **Authorizers**: bearer tokens and HMAC-SHA512 request signing
//! - **Typed Errors**: every failure carries a code, status code and request id
//! - **Decoders**: response bodies decoded by content type, JSON by default
//! - **Cancellation**: abort a request between or during attempts
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use remit_client::{Client, ClientConfig, Operation};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct User {
//!     id: String,
//!     email: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::new(
//!         ClientConfig::builder()
//!             .base_url("https://sandbox.api.example.com")
//!             .build(),
//!     )?;
//!
//!     let user: User = client
//!         .new_request(&Operation::get("/v1/users/me"))?
//!         .send()
//!         .await?;
//!
//!     println!("{user:?}");
//!     Ok(())
//! }
//! ```
//!
//! ## Signing and Retries
//!
//! ```rust,no_run
//! use remit_client::{Client, ClientConfig, DefaultRetryer, Operation, SignatureAuthorizer};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder()
//!         .base_url("https://sandbox.api.example.com")
//!         .request_timeout(Duration::from_secs(10))
//!         .authorizer(SignatureAuthorizer::new("client-id", "secret-key"))
//!         .retryer(DefaultRetryer::new(5))
//!         .build();
//!
//!     let client = Client::new(config)?;
//!
//!     // Failed attempts are retried with the body replayed and re-signed
//!     client
//!         .new_request(&Operation::post("/v1/transfers"))?
//!         .json(&serde_json::json!({"beneficiary_id": "b-1", "amount": "250.00"}))?
//!         .send_empty()
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

mod auth;
mod body;
mod client;
mod config;
mod error;
mod request;
mod retry;
mod unmarshal;

pub use auth::{
    Authorizer, BearerTokenAuthorizer, CLIENT_ID_HEADER, SIGNATURE_HEADER, SignatureAuthorizer,
};
pub use body::{BoxedSource, ReadSeek, ReplayableBody};
pub use client::{Client, Operation};
pub use config::{
    ClientConfig, ClientConfigBuilder, DEFAULT_IDLE_CONN_TIMEOUT, DEFAULT_MAX_IDLE_CONNS,
    DEFAULT_MAX_IDLE_CONNS_PER_HOST, DEFAULT_MAX_RETRIES, DEFAULT_REQUEST_TIMEOUT,
    DEFAULT_TLS_HANDSHAKE_TIMEOUT, ResolvedConfig,
};
pub use error::{ApiError, BoxError, ErrorCode, RequestFailure, Result};
pub use request::{REQUEST_ID_HEADER, Request, RequestState};
pub use retry::{Attempt, DefaultRetryer, MAX_RETRY_AFTER, Retryer, retry_after};
pub use unmarshal::{
    CONTENT_TYPE_FORM, CONTENT_TYPE_JSON, FormUnmarshaler, JsonUnmarshaler, Unmarshaler,
    UnmarshalerRegistry,
};

// Re-export common types
pub use http::{HeaderMap, HeaderValue, Method, StatusCode, header};
pub use tokio_util::sync::CancellationToken;
pub use url::Url;

/// Prelude for common imports.
///
/// ```
/// use remit_client::prelude::*;
/// ```
pub mod prelude {
    pub use crate::auth::{Authorizer, BearerTokenAuthorizer, SignatureAuthorizer};
    pub use crate::client::{Client, Operation};
    pub use crate::config::{ClientConfig, ClientConfigBuilder};
    pub use crate::error::{ApiError, ErrorCode, RequestFailure, Result};
    pub use crate::request::{Request, RequestState};
    pub use crate::retry::{Attempt, DefaultRetryer, Retryer};
    pub use crate::unmarshal::{Unmarshaler, UnmarshalerRegistry};
    pub use http::{Method, StatusCode};
    pub use tokio_util::sync::CancellationToken;
}
