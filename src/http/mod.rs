//! HTTP acquisition stack: requests, responses, wire transports, and
//! the caching client facade.
//!
//! The stack is layered:
//!
//! ```text
//! caller ──► HttpClient (typed reads, read-through cache)
//!                │
//!                ▼
//!           Transport (one GET; proxy/auth/multipart/progress)
//!                │
//!                ▼
//!        ReqwestTransport | BlockingTransport  (via TransportFactory)
//! ```
//!
//! A [`HttpClient`] owns one transport handle and is not shared across
//! tasks; use [`ClientPool`] to hand clients out per operation.

mod blocking_backend;
mod client;
mod context;
mod multipart;
mod request;
mod reqwest_backend;
mod response;
mod transport;

pub use blocking_backend::{BlockingTransport, BlockingTransportFactory};
pub use client::{ClientPool, HttpClient, PooledClient};
pub use context::HttpContext;
pub use multipart::{boundary_from_mime, decode_multipart, MultipartError};
pub use request::{Headers, HttpRequest};
pub use reqwest_backend::ReqwestTransport;
pub use response::{CodeCategory, HttpResponse, Part};
pub use transport::{
    Credential, CredentialStore, ProxySettings, RequestEnv, Transport, TransportFactory,
};

use chrono::{DateTime, Utc};
use std::time::SystemTime;

/// Formats a timestamp as an RFC 1123 HTTP date
/// (`Tue, 15 Nov 1994 08:12:31 GMT`).
pub(crate) fn format_http_date(when: SystemTime) -> String {
    let dt: DateTime<Utc> = when.into();
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parses an HTTP date header value into a timestamp.
pub(crate) fn parse_http_date(value: &str) -> Option<SystemTime> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc).into())
}
