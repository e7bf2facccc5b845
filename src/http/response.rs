//! HTTP response model: status, parts, and cached-response synthesis.

use super::request::Headers;
use crate::config::Config;
use bytes::Bytes;
use std::time::{Duration, SystemTime};

/// Status-code category. Code 0 indicates transport failure; all other
/// values partition into the standard HTTP classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeCategory {
    /// Below 100 (including transport failure code 0).
    Unknown,
    /// 100–199.
    Informational,
    /// 200–299.
    Success,
    /// 300–399.
    Redirection,
    /// 400–499.
    ClientError,
    /// 500–599.
    ServerError,
}

/// One body segment of a response. Single-part is the common case;
/// multipart/related content yields several.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Part {
    pub headers: Headers,
    pub body: Bytes,
}

impl Part {
    pub fn new(headers: Headers, body: Bytes) -> Self {
        Self { headers, body }
    }

    /// Size of this part's byte stream.
    pub fn size(&self) -> usize {
        self.body.len()
    }

    /// This part's bytes interpreted as UTF-8 (lossy).
    pub fn as_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Response to a single GET, possibly synthesized from the cache.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    code: u32,
    mime_type: String,
    message: String,
    duration: Duration,
    last_modified: Option<SystemTime>,
    canceled: bool,
    timed_out: bool,
    from_cache: bool,
    parts: Vec<Part>,
}

impl HttpResponse {
    pub const NOT_FOUND: u32 = 404;
    pub const NOT_MODIFIED: u32 = 304;

    pub fn new(code: u32) -> Self {
        Self {
            code,
            ..Default::default()
        }
    }

    /// Builds a code-0 response describing a transport failure.
    pub fn transport_failure(message: impl Into<String>) -> Self {
        Self {
            code: 0,
            message: message.into(),
            ..Default::default()
        }
    }

    /// Builds a code-0 response for a canceled or timed-out transfer.
    pub fn canceled(message: impl Into<String>, timed_out: bool) -> Self {
        Self {
            code: 0,
            message: message.into(),
            canceled: true,
            timed_out,
            ..Default::default()
        }
    }

    pub fn code(&self) -> u32 {
        self.code
    }

    pub fn category(&self) -> CodeCategory {
        match self.code {
            0..=99 => CodeCategory::Unknown,
            100..=199 => CodeCategory::Informational,
            200..=299 => CodeCategory::Success,
            300..=399 => CodeCategory::Redirection,
            400..=499 => CodeCategory::ClientError,
            _ => CodeCategory::ServerError,
        }
    }

    /// True for a 200 that was not canceled. Cache writes only happen
    /// for responses that pass this check.
    pub fn is_ok(&self) -> bool {
        self.code == 200 && !self.canceled
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled
    }

    pub fn set_canceled(&mut self, canceled: bool) {
        self.canceled = canceled;
    }

    /// True when the transfer was aborted by a connect or transfer
    /// timeout rather than by the caller.
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    pub fn set_timed_out(&mut self, timed_out: bool) {
        self.timed_out = timed_out;
    }

    pub fn from_cache(&self) -> bool {
        self.from_cache
    }

    pub fn set_from_cache(&mut self, from_cache: bool) {
        self.from_cache = from_cache;
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn set_mime_type(&mut self, mime: impl Into<String>) {
        self.mime_type = mime.into();
    }

    /// Backend error string, when the request failed before producing
    /// a status code.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = message.into();
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn set_duration(&mut self, duration: Duration) {
        self.duration = duration;
    }

    pub fn last_modified(&self) -> Option<SystemTime> {
        self.last_modified
    }

    pub fn set_last_modified(&mut self, when: Option<SystemTime>) {
        self.last_modified = when;
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn parts_mut(&mut self) -> &mut Vec<Part> {
        &mut self.parts
    }

    pub fn num_parts(&self) -> usize {
        self.parts.len()
    }

    pub fn part(&self, n: usize) -> Option<&Part> {
        self.parts.get(n)
    }

    /// Part `n`'s bytes as a UTF-8 string, empty when absent.
    pub fn part_as_string(&self, n: usize) -> String {
        self.parts.get(n).map(|p| p.as_string()).unwrap_or_default()
    }

    /// Captures part 0's headers as a config subtree; this is the
    /// metadata stored alongside cache entries.
    pub fn headers_as_config(&self) -> Config {
        let mut conf = Config::new("response-headers");
        if let Some(part) = self.parts.first() {
            for (name, value) in part.headers.iter() {
                conf.add(name, value);
            }
        }
        conf
    }

    /// Restores part 0's headers from a config subtree.
    pub fn set_headers_from_config(&mut self, conf: &Config) {
        if let Some(part) = self.parts.first_mut() {
            for child in conf.children_all() {
                if let Some(value) = child.value() {
                    part.headers.set(child.key(), value);
                }
            }
        }
    }
}
