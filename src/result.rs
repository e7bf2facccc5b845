//! Typed read results and the error-code taxonomy.
//!
//! Every read operation on the HTTP surface returns a [`ReadResult`];
//! errors never propagate as `Err` across that boundary. The result
//! carries the decoded payload (if any), an error code from
//! [`ResultCode`], a diagnostic detail string (often the error body,
//! which callers may parse for service exceptions), and a metadata
//! [`Config`] reproducing request and response headers.

use crate::config::Config;
use std::any::Any;
use std::time::{Duration, SystemTime};

/// Outcome classification for a read operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    /// 200 response decoded successfully.
    Ok,
    /// Caller or transport aborted.
    Canceled,
    /// 404.
    NotFound,
    /// 304; the caller should treat its cached copy as fresh.
    NotModified,
    /// 401 or 403.
    Unauthorized,
    /// 5xx.
    ServerError,
    /// Connect or transfer timeout.
    Timeout,
    /// No decoder matched the content.
    NoReader,
    /// A decoder matched but failed to produce content.
    ReaderError,
    /// Anything else, including transport failure with no cancel.
    UnknownError,
}

impl ResultCode {
    /// Recoverable codes signal "retry with delay" to the caller's
    /// scheduler.
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            ResultCode::ServerError | ResultCode::Timeout | ResultCode::Canceled
        )
    }
}

/// Decoded payload of a successful read.
pub enum ReadValue {
    /// A decoded raster image.
    Image(image::DynamicImage),
    /// A scene node produced by an external decoder; opaque here.
    Node(Box<dyn Any + Send + Sync>),
    /// An arbitrary object produced by an external decoder.
    Object(Box<dyn Any + Send + Sync>),
    /// Text content.
    Text(String),
}

impl std::fmt::Debug for ReadValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadValue::Image(img) => f
                .debug_struct("Image")
                .field("width", &img.width())
                .field("height", &img.height())
                .finish(),
            ReadValue::Node(_) => f.write_str("Node(..)"),
            ReadValue::Object(_) => f.write_str("Object(..)"),
            ReadValue::Text(s) => f.debug_tuple("Text").field(&s.len()).finish(),
        }
    }
}

/// Result of a typed read: payload, classification, and provenance.
#[derive(Debug)]
pub struct ReadResult {
    code: ResultCode,
    value: Option<ReadValue>,
    last_modified: Option<SystemTime>,
    duration: Duration,
    from_cache: bool,
    error_detail: String,
    metadata: Config,
}

impl ReadResult {
    /// Creates a successful result holding a payload.
    pub fn ok(value: ReadValue) -> Self {
        Self {
            code: ResultCode::Ok,
            value: Some(value),
            last_modified: None,
            duration: Duration::ZERO,
            from_cache: false,
            error_detail: String::new(),
            metadata: Config::default(),
        }
    }

    /// Creates a failed result with the given code.
    pub fn error(code: ResultCode) -> Self {
        Self {
            code,
            value: None,
            last_modified: None,
            duration: Duration::ZERO,
            from_cache: false,
            error_detail: String::new(),
            metadata: Config::default(),
        }
    }

    pub fn code(&self) -> ResultCode {
        self.code
    }

    pub fn succeeded(&self) -> bool {
        self.code == ResultCode::Ok
    }

    pub fn failed(&self) -> bool {
        !self.succeeded()
    }

    pub fn value(&self) -> Option<&ReadValue> {
        self.value.as_ref()
    }

    /// Consumes the result, returning the payload if any.
    pub fn take_value(self) -> Option<ReadValue> {
        self.value
    }

    /// Returns the decoded image, when the payload is one.
    pub fn image(&self) -> Option<&image::DynamicImage> {
        match &self.value {
            Some(ReadValue::Image(img)) => Some(img),
            _ => None,
        }
    }

    /// Returns the text content, when the payload is text.
    pub fn text(&self) -> Option<&str> {
        match &self.value {
            Some(ReadValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn last_modified(&self) -> Option<SystemTime> {
        self.last_modified
    }

    pub fn set_last_modified(&mut self, when: Option<SystemTime>) {
        self.last_modified = when;
    }

    /// Wall-clock duration of the underlying request.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn set_duration(&mut self, duration: Duration) {
        self.duration = duration;
    }

    /// True when the payload was served from the cache layer.
    pub fn from_cache(&self) -> bool {
        self.from_cache
    }

    pub fn set_from_cache(&mut self, from_cache: bool) {
        self.from_cache = from_cache;
    }

    /// Diagnostic detail: decoder message or raw error body.
    pub fn error_detail(&self) -> &str {
        &self.error_detail
    }

    pub fn set_error_detail(&mut self, detail: impl Into<String>) {
        self.error_detail = detail.into();
    }

    /// Request/response header metadata captured for this read.
    pub fn metadata(&self) -> &Config {
        &self.metadata
    }

    pub fn set_metadata(&mut self, metadata: Config) {
        self.metadata = metadata;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_codes() {
        assert!(ResultCode::ServerError.is_recoverable());
        assert!(ResultCode::Timeout.is_recoverable());
        assert!(ResultCode::Canceled.is_recoverable());
        assert!(!ResultCode::NotFound.is_recoverable());
        assert!(!ResultCode::NoReader.is_recoverable());
        assert!(!ResultCode::UnknownError.is_recoverable());
    }

    #[test]
    fn test_ok_result() {
        let result = ReadResult::ok(ReadValue::Text("hello".into()));
        assert!(result.succeeded());
        assert_eq!(result.text(), Some("hello"));
        assert!(result.image().is_none());
    }

    #[test]
    fn test_error_result_carries_detail() {
        let mut result = ReadResult::error(ResultCode::ServerError);
        result.set_error_detail("<ServiceException>boom</ServiceException>");
        assert!(result.failed());
        assert!(result.error_detail().contains("boom"));
    }
}
