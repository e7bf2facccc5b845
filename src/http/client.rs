//! HTTP client facade: read-through caching plus typed decoding.
//!
//! A [`HttpClient`] owns one transport handle and coordinates the
//! cache, policy, decoder registry, and error taxonomy for callers.
//! Clients are cheap; a [`ClientPool`] hands one out per operation so
//! no two tasks ever share a transport handle.

use super::context::HttpContext;
use super::request::{Headers, HttpRequest};
use super::response::{CodeCategory, HttpResponse, Part};
use super::transport::{RequestEnv, Transport};
use crate::cache::{must_revalidate, CachePolicy, CacheRecord, CacheUsage};
use crate::config::Config;
use crate::progress::Progress;
use crate::result::{ReadResult, ReadValue, ResultCode};
use crate::uri::cache_key;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{trace, warn};

/// What a typed read is expected to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadKind {
    Image,
    Node,
    Object,
    Text,
}

impl ReadKind {
    fn noun(self) -> &'static str {
        match self {
            ReadKind::Image => "image",
            ReadKind::Node => "node",
            ReadKind::Object => "object",
            ReadKind::Text => "string",
        }
    }
}

/// Caching, typed-read HTTP client. One transport handle per instance;
/// not shared across tasks.
pub struct HttpClient {
    context: Arc<HttpContext>,
    transport: Box<dyn Transport>,
}

impl HttpClient {
    /// Creates a client over the process-default context.
    pub fn new() -> Self {
        Self::with_context(HttpContext::global())
    }

    /// Creates a client over an explicit context.
    pub fn with_context(context: Arc<HttpContext>) -> Self {
        let mut transport = context.transport_factory().create(context.clone());
        transport.set_user_agent(&context.user_agent());
        transport.set_timeout(context.timeout());
        transport.set_connect_timeout(context.connect_timeout());
        Self { context, transport }
    }

    pub fn context(&self) -> &Arc<HttpContext> {
        &self.context
    }

    /// Performs one GET through the cache layer.
    ///
    /// Fresh cache hits short-circuit the transport. Expired hits and
    /// misses delegate to the transport; a 304 touches the cached
    /// entry and serves it, an OK response is written back. A
    /// `CacheOnly` policy never touches the network and serves
    /// whatever the cache holds, stale or not.
    pub async fn do_get(
        &mut self,
        request: &HttpRequest,
        env: &RequestEnv,
        progress: Option<&dyn Progress>,
    ) -> HttpResponse {
        let key = cache_key(&request.full_url());

        let (bin, policy) = match &env.cache {
            Some(cc) if cc.policy.usage != CacheUsage::NoCache => {
                (Some(cc.cache.default_bin()), cc.policy)
            }
            Some(cc) => (None, cc.policy),
            None => (None, CachePolicy::default()),
        };

        let mut cached: Option<HttpResponse> = None;
        let mut expired = false;
        if let Some(bin) = &bin {
            match bin.read(&key) {
                Ok(Some(record)) => {
                    expired = must_revalidate(&record.metadata)
                        || policy.is_expired(record.last_modified);
                    cached = Some(Self::response_from_record(record));
                }
                Ok(None) => {}
                Err(e) => warn!(key = %key, error = %e, "Cache read failed"),
            }
        }

        if !expired {
            if let Some(response) = cached.take() {
                trace!(key = %key, "Serving fresh cache hit");
                return response;
            }
        }

        if policy.usage == CacheUsage::CacheOnly {
            return cached.unwrap_or_else(|| {
                HttpResponse::transport_failure("cache-only policy with no cached entry")
            });
        }

        // revalidate an expired entry conditionally so the server can
        // answer 304 instead of resending the body
        let mut conditional = None;
        if let Some(cached) = &cached {
            if request.if_modified_since().is_none() {
                if let Some(when) = cached.last_modified() {
                    let mut revalidation = request.clone();
                    revalidation.set_if_modified_since(when);
                    conditional = Some(revalidation);
                }
            }
        }
        let wire_request = conditional.as_ref().unwrap_or(request);

        let remote = self.transport.do_get(wire_request, env, progress).await;

        if remote.code() == HttpResponse::NOT_MODIFIED {
            // refresh the entry timestamp so it does not expire again
            // immediately
            if let Some(bin) = &bin {
                bin.touch(&key);
            }
            if let Some(cached) = cached {
                return cached;
            }
            return remote;
        }

        if remote.is_ok() {
            if let Some(bin) = &bin {
                if let Some(part) = remote.part(0) {
                    if let Err(e) = bin.write(&key, &part.body, &remote.headers_as_config()) {
                        warn!(key = %key, error = %e, "Cache write failed");
                    }
                }
            }
        }

        remote
    }

    /// Fetches and decodes a raster image.
    pub async fn read_image(
        &mut self,
        request: &HttpRequest,
        env: &RequestEnv,
        progress: Option<&dyn Progress>,
    ) -> ReadResult {
        self.read_typed(ReadKind::Image, request, env, progress).await
    }

    /// Fetches and decodes a scene node.
    pub async fn read_node(
        &mut self,
        request: &HttpRequest,
        env: &RequestEnv,
        progress: Option<&dyn Progress>,
    ) -> ReadResult {
        self.read_typed(ReadKind::Node, request, env, progress).await
    }

    /// Fetches and decodes an arbitrary object.
    pub async fn read_object(
        &mut self,
        request: &HttpRequest,
        env: &RequestEnv,
        progress: Option<&dyn Progress>,
    ) -> ReadResult {
        self.read_typed(ReadKind::Object, request, env, progress).await
    }

    /// Fetches text content. Bypasses the decoder registry.
    pub async fn read_string(
        &mut self,
        request: &HttpRequest,
        env: &RequestEnv,
        progress: Option<&dyn Progress>,
    ) -> ReadResult {
        self.read_typed(ReadKind::Text, request, env, progress).await
    }

    /// Fetches a URL and writes its body to a local file. Multipart
    /// responses write part 1 (the payload part in WCS replies).
    pub async fn download(
        &mut self,
        url: &str,
        path: impl AsRef<Path>,
    ) -> std::io::Result<()> {
        let request = HttpRequest::new(url);
        let response = self.do_get(&request, &RequestEnv::default(), None).await;
        if !response.is_ok() {
            warn!(url, code = response.code(), "Download failed");
            return Err(std::io::Error::other(format!(
                "download failed with code {}",
                response.code()
            )));
        }
        let index = if response.num_parts() > 1 { 1 } else { 0 };
        match response.part(index) {
            Some(part) => std::fs::write(path, &part.body),
            None => Err(std::io::Error::other("response carried no content")),
        }
    }

    async fn read_typed(
        &mut self,
        kind: ReadKind,
        request: &HttpRequest,
        env: &RequestEnv,
        progress: Option<&dyn Progress>,
    ) -> ReadResult {
        let response = self.do_get(request, env, progress).await;

        let mut result = if response.is_ok() {
            match kind {
                ReadKind::Text => {
                    if response.num_parts() > 0 {
                        ReadResult::ok(ReadValue::Text(response.part_as_string(0)))
                    } else {
                        ReadResult::error(ResultCode::UnknownError)
                    }
                }
                _ => self.decode_part(kind, request, &response),
            }
        } else {
            let code = Self::classify(&response);
            let mut result = ReadResult::error(code);

            // surface the error body so callers can parse service
            // exceptions out of it
            if response.num_parts() > 0 {
                result.set_error_detail(response.part_as_string(0));
                if self.context.debug() {
                    warn!(detail = %result.error_detail(), "Server reported an error body");
                }
            } else if !response.message().is_empty() {
                result.set_error_detail(response.message());
            }

            if code.is_recoverable() {
                if let Some(p) = progress {
                    p.set_retry_delay(self.context.retry_delay());
                    p.cancel();
                    if response.code() == 503 {
                        p.set_message("Server deferral");
                    }
                }
            }
            result
        };

        result.set_last_modified(response.last_modified());
        result.set_duration(response.duration());
        result.set_from_cache(response.from_cache());
        result.set_metadata(Self::build_metadata(request, &response));
        result
    }

    fn decode_part(
        &self,
        kind: ReadKind,
        request: &HttpRequest,
        response: &HttpResponse,
    ) -> ReadResult {
        let registry = self.context.decoders();
        let bytes: &[u8] = response.part(0).map(|p| p.body.as_ref()).unwrap_or(&[]);

        let decoder = match registry.find(&request.full_url(), response.mime_type(), bytes) {
            Some(decoder) => decoder,
            None => {
                let mut result = ReadResult::error(ResultCode::NoReader);
                result.set_error_detail(format!("Content-Type={}", response.mime_type()));
                return result;
            }
        };

        match decoder.decode(bytes) {
            Ok(value) => {
                let matches = matches!(
                    (kind, &value),
                    (ReadKind::Image, ReadValue::Image(_))
                        | (ReadKind::Node, ReadValue::Node(_))
                        | (ReadKind::Object, _)
                );
                if matches {
                    ReadResult::ok(value)
                } else {
                    let mut result = ReadResult::error(ResultCode::ReaderError);
                    result.set_error_detail(format!(
                        "decoder \"{}\" produced no {}",
                        decoder.name(),
                        kind.noun()
                    ));
                    result
                }
            }
            Err(e) => {
                if self.context.debug() {
                    warn!(
                        decoder = decoder.name(),
                        url = %request.full_url(),
                        error = %e,
                        "Decoder failed"
                    );
                }
                let mut result = ReadResult::error(ResultCode::ReaderError);
                result.set_error_detail(e.to_string());
                result
            }
        }
    }

    /// Maps a non-OK response onto the result-code taxonomy. Code 0
    /// without a cancel flag classifies as unknown, whatever the
    /// message says; a timed-out cancel classifies as timeout.
    fn classify(response: &HttpResponse) -> ResultCode {
        if response.is_canceled() {
            return if response.timed_out() {
                ResultCode::Timeout
            } else {
                ResultCode::Canceled
            };
        }
        match response.code() {
            404 => ResultCode::NotFound,
            304 => ResultCode::NotModified,
            401 | 403 => ResultCode::Unauthorized,
            _ if response.category() == CodeCategory::ServerError => ResultCode::ServerError,
            _ => ResultCode::UnknownError,
        }
    }

    /// Synthesizes a response from a cache record. A missing stored
    /// content-type serves as an empty MIME; decoder lookup can still
    /// succeed by sniff or extension.
    fn response_from_record(record: CacheRecord) -> HttpResponse {
        let mut response = HttpResponse::new(200);
        response.set_mime_type(record.metadata.get("content-type").unwrap_or(""));
        response.set_last_modified(Some(record.last_modified));

        let mut headers = Headers::new();
        headers.apply_config(&record.metadata);
        response.parts_mut().push(Part::new(headers, record.data));
        response.set_from_cache(true);
        response
    }

    /// Captures request/response provenance for the result metadata.
    fn build_metadata(request: &HttpRequest, response: &HttpResponse) -> Config {
        let mut meta = response.headers_as_config();
        meta.set_key("http-get");

        let mut req = Config::new("request");
        req.add("uri", request.full_url());
        if response.code() == 0 {
            if response.message().is_empty() {
                req.add("error", "unknown");
            } else {
                req.add("error", response.message());
            }
        } else {
            req.add("code", response.code());
            req.add_child(request.headers_as_config());
        }
        meta.add_child(req);
        meta
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Pool of clients; callers acquire one per operation instead of
/// keeping a client per thread.
pub struct ClientPool {
    context: Arc<HttpContext>,
    clients: Mutex<Vec<HttpClient>>,
}

impl ClientPool {
    pub fn new(context: Arc<HttpContext>) -> Arc<Self> {
        Arc::new(Self {
            context,
            clients: Mutex::new(Vec::new()),
        })
    }

    /// Takes a client from the pool, creating one if none is idle. The
    /// client returns to the pool when the guard drops.
    pub fn acquire(self: &Arc<Self>) -> PooledClient {
        let client = self
            .clients
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop()
            .unwrap_or_else(|| HttpClient::with_context(self.context.clone()));
        PooledClient {
            pool: self.clone(),
            client: Some(client),
        }
    }

    /// Number of idle clients currently pooled.
    pub fn idle(&self) -> usize {
        self.clients.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Guard over a pooled [`HttpClient`].
pub struct PooledClient {
    pool: Arc<ClientPool>,
    client: Option<HttpClient>,
}

impl std::ops::Deref for PooledClient {
    type Target = HttpClient;

    fn deref(&self) -> &HttpClient {
        self.client.as_ref().expect("client present until drop")
    }
}

impl std::ops::DerefMut for PooledClient {
    fn deref_mut(&mut self) -> &mut HttpClient {
        self.client.as_mut().expect("client present until drop")
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            self.pool
                .clients
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(client);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use bytes::Bytes;
    use std::time::SystemTime;

    #[test]
    fn test_classify_by_code() {
        assert_eq!(HttpClient::classify(&HttpResponse::new(404)), ResultCode::NotFound);
        assert_eq!(HttpClient::classify(&HttpResponse::new(304)), ResultCode::NotModified);
        assert_eq!(HttpClient::classify(&HttpResponse::new(401)), ResultCode::Unauthorized);
        assert_eq!(HttpClient::classify(&HttpResponse::new(403)), ResultCode::Unauthorized);
        assert_eq!(HttpClient::classify(&HttpResponse::new(500)), ResultCode::ServerError);
        assert_eq!(HttpClient::classify(&HttpResponse::new(503)), ResultCode::ServerError);
        assert_eq!(HttpClient::classify(&HttpResponse::new(418)), ResultCode::UnknownError);
    }

    #[test]
    fn test_classify_code_zero_without_cancel_is_unknown() {
        let response = HttpResponse::transport_failure("");
        assert_eq!(HttpClient::classify(&response), ResultCode::UnknownError);
    }

    #[test]
    fn test_classify_cancel_and_timeout() {
        let canceled = HttpResponse::canceled("user abort", false);
        assert_eq!(HttpClient::classify(&canceled), ResultCode::Canceled);
        let timed_out = HttpResponse::canceled("operation timed out", true);
        assert_eq!(HttpClient::classify(&timed_out), ResultCode::Timeout);
    }

    #[test]
    fn test_response_from_record_missing_content_type() {
        let record = CacheRecord {
            data: Bytes::from_static(b"payload"),
            metadata: Config::new("response-headers"),
            last_modified: SystemTime::now(),
        };
        let response = HttpClient::response_from_record(record);
        assert!(response.is_ok());
        assert!(response.from_cache());
        assert_eq!(response.mime_type(), "");
        assert_eq!(response.part_as_string(0), "payload");
    }

    #[test]
    fn test_metadata_for_transport_failure() {
        let request = HttpRequest::new("http://example.com/a.png");
        let response = HttpResponse::transport_failure("connection refused");
        let meta = HttpClient::build_metadata(&request, &response);
        let req = meta.child("request").unwrap();
        assert_eq!(req.get("uri"), Some("http://example.com/a.png"));
        assert_eq!(req.get("error"), Some("connection refused"));
        assert!(req.get("code").is_none());
    }

    #[test]
    fn test_metadata_for_http_error() {
        let mut request = HttpRequest::new("http://example.com/a.png");
        request.add_header("accept", "image/png");
        let response = HttpResponse::new(404);
        let meta = HttpClient::build_metadata(&request, &response);
        let req = meta.child("request").unwrap();
        assert_eq!(req.get("code"), Some("404"));
        assert_eq!(
            req.child("request-headers").unwrap().get("accept"),
            Some("image/png")
        );
    }
}
