//! Blocking wire backend.
//!
//! The simpler of the two backends: it drives `reqwest::blocking` on
//! the runtime's blocking pool and reads the whole body in one go.
//! Cancellation is polled before dispatch rather than between chunks,
//! so it suits bulk fetches more than interactive streaming. Selected
//! by installing [`BlockingTransportFactory`] on the context.

use super::context::HttpContext;
use super::multipart::{boundary_from_mime, decode_multipart};
use super::request::{Headers, HttpRequest};
use super::response::{HttpResponse, Part};
use super::transport::{
    next_handle, Credential, ProxySettings, RequestEnv, Transport, TransportFactory,
};
use crate::progress::Progress;
use crate::uri::TransportHandle;
use bytes::Bytes;
use futures::future::BoxFuture;
use reqwest::redirect::Policy;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Raw outcome shipped back from the blocking task.
struct WireResult {
    code: u32,
    mime: String,
    last_modified: Option<String>,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

enum WireError {
    Timeout(String),
    ProxyConnect(String),
    Other(String),
}

/// Blocking HTTP backend.
pub struct BlockingTransport {
    context: Arc<HttpContext>,
    handle: TransportHandle,
    user_agent: String,
    timeout: Duration,
    connect_timeout: Duration,
    previous_credential: Option<Credential>,
}

impl BlockingTransport {
    pub fn new(context: Arc<HttpContext>) -> Self {
        let handle = next_handle();
        if let Some(handler) = context.config_handler() {
            handler.on_initialize(handle);
        }
        let user_agent = context.user_agent();
        Self {
            context,
            handle,
            user_agent,
            timeout: Duration::ZERO,
            connect_timeout: Duration::ZERO,
            previous_credential: None,
        }
    }
}

/// Installs [`BlockingTransport`] as the process backend.
pub struct BlockingTransportFactory;

impl TransportFactory for BlockingTransportFactory {
    fn create(&self, context: Arc<HttpContext>) -> Box<dyn Transport> {
        Box::new(BlockingTransport::new(context))
    }
}

fn perform_blocking(
    url: String,
    headers: Vec<(String, String)>,
    credential: Option<Credential>,
    proxy: Option<ProxySettings>,
    user_agent: String,
    timeout: Duration,
    connect_timeout: Duration,
) -> Result<WireResult, WireError> {
    let mut builder = reqwest::blocking::Client::builder()
        .redirect(Policy::limited(5))
        .gzip(true)
        .deflate(true)
        .danger_accept_invalid_certs(true)
        .user_agent(user_agent);
    if timeout > Duration::ZERO {
        builder = builder.timeout(timeout);
    }
    if connect_timeout > Duration::ZERO {
        builder = builder.connect_timeout(connect_timeout);
    }
    let has_proxy = proxy.is_some();
    if let Some(settings) = proxy {
        let mut p = reqwest::Proxy::all(format!("http://{}", settings.address()))
            .map_err(|e| WireError::Other(format!("Invalid proxy configuration: {}", e)))?;
        if let (Some(user), Some(pass)) = (&settings.username, &settings.password) {
            p = p.basic_auth(user, pass);
        }
        builder = builder.proxy(p);
    }
    let client = builder
        .build()
        .map_err(|e| WireError::Other(format!("Failed to create HTTP client: {}", e)))?;

    let mut request = client.get(&url);
    for (name, value) in &headers {
        request = request.header(name, value);
    }
    if let Some(cred) = &credential {
        request = request.basic_auth(&cred.username, Some(&cred.password));
    }

    let map_err = move |e: reqwest::Error| {
        if e.is_timeout() {
            WireError::Timeout(e.to_string())
        } else if e.is_connect() && has_proxy {
            WireError::ProxyConnect(e.to_string())
        } else {
            WireError::Other(e.to_string())
        }
    };

    let response = request.send().map_err(map_err)?;
    let code = response.status().as_u16() as u32;
    let mime = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let last_modified = response
        .headers()
        .get(reqwest::header::LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let response_headers: Vec<(String, String)> = response
        .headers()
        .iter()
        .filter_map(|(n, v)| v.to_str().ok().map(|v| (n.to_string(), v.trim().to_string())))
        .collect();
    let body = response.bytes().map_err(map_err)?.to_vec();

    Ok(WireResult {
        code,
        mime,
        last_modified,
        headers: response_headers,
        body,
    })
}

impl Transport for BlockingTransport {
    fn do_get<'a>(
        &'a mut self,
        request: &'a HttpRequest,
        env: &'a RequestEnv,
        progress: Option<&'a dyn Progress>,
    ) -> BoxFuture<'a, HttpResponse> {
        Box::pin(async move {
            let started = Instant::now();

            if let Some(p) = progress {
                if p.is_canceled() {
                    return HttpResponse::canceled("canceled before dispatch", false);
                }
            }

            let mut url = request.full_url();
            if let Some(rewriter) = self.context.rewriter() {
                url = rewriter.rewrite(&url);
            }

            let proxy = env.proxy.clone().or_else(|| self.context.proxy());

            let store = env
                .credentials
                .clone()
                .unwrap_or_else(|| self.context.credentials());
            let credential = store.for_url(&url);
            if credential != self.previous_credential {
                self.previous_credential = credential;
            }

            let headers: Vec<(String, String)> = request
                .headers()
                .iter()
                .map(|(n, v)| (n.to_ascii_lowercase(), v.to_string()))
                .collect();

            if let Some(handler) = self.context.config_handler() {
                handler.on_get(self.handle);
            }

            let task_url = url.clone();
            let task_credential = self.previous_credential.clone();
            let user_agent = self.user_agent.clone();
            let (timeout, connect_timeout) = (self.timeout, self.connect_timeout);

            let outcome = tokio::task::spawn_blocking(move || {
                perform_blocking(
                    task_url,
                    headers,
                    task_credential,
                    proxy,
                    user_agent,
                    timeout,
                    connect_timeout,
                )
            })
            .await;

            let wire = match outcome {
                Ok(Ok(wire)) => wire,
                Ok(Err(WireError::Timeout(msg))) => return HttpResponse::canceled(msg, true),
                Ok(Err(WireError::ProxyConnect(msg))) => {
                    warn!(url = %url, "Proxy connect error");
                    return HttpResponse::transport_failure(format!("Proxy connect error {}", msg));
                }
                Ok(Err(WireError::Other(msg))) => return HttpResponse::transport_failure(msg),
                Err(join) => {
                    return HttpResponse::transport_failure(format!(
                        "blocking transport task failed: {}",
                        join
                    ))
                }
            };

            let code = self.context.maybe_simulate(wire.code);
            let mut out = HttpResponse::new(code);
            out.set_mime_type(&wire.mime);
            out.set_last_modified(
                wire.last_modified
                    .as_deref()
                    .and_then(super::parse_http_date),
            );

            if wire.mime.starts_with("multipart") {
                let boundary = boundary_from_mime(&wire.mime).unwrap_or_else(|| "wcs".to_string());
                match decode_multipart(&wire.body, &boundary) {
                    Ok(parts) => *out.parts_mut() = parts,
                    Err(e) => {
                        warn!(url = %url, error = %e, "Failed to decode multipart stream");
                        out.set_message(e.to_string());
                    }
                }
            } else {
                let mut part_headers = Headers::new();
                for (name, value) in &wire.headers {
                    part_headers.add(name, value);
                }
                out.parts_mut()
                    .push(Part::new(part_headers, Bytes::from(wire.body)));
            }

            out.set_duration(started.elapsed());
            self.context.record_request(out.duration());
            out
        })
    }

    fn set_user_agent(&mut self, agent: &str) {
        self.user_agent = agent.to_string();
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn set_connect_timeout(&mut self, timeout: Duration) {
        self.connect_timeout = timeout;
    }

    fn handle(&self) -> TransportHandle {
        self.handle
    }
}
