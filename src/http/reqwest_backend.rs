//! Async streaming wire backend.
//!
//! The workhorse transport: proxy with precedence rules, URL rewrite,
//! lowercased request headers, a five-redirect cap, transparent
//! gzip/deflate decoding, peer-cert verification disabled at this
//! layer, longest-prefix credentials with per-handle caching, and
//! chunk-level progress polling so a caller can abort mid-transfer.

use super::context::HttpContext;
use super::multipart::{boundary_from_mime, decode_multipart};
use super::request::{Headers, HttpRequest};
use super::response::{HttpResponse, Part};
use super::transport::{next_handle, Credential, ProxySettings, RequestEnv, Transport};
use crate::progress::Progress;
use crate::uri::TransportHandle;
use bytes::Bytes;
use futures::future::BoxFuture;
use reqwest::redirect::Policy;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Configuration fingerprint of the inner connection pool. The pool is
/// rebuilt only when this changes between requests.
#[derive(Clone, Default, PartialEq)]
struct ClientKey {
    proxy: Option<ProxySettings>,
    user_agent: String,
    timeout: Duration,
    connect_timeout: Duration,
}

/// Async HTTP backend built on reqwest.
pub struct ReqwestTransport {
    context: Arc<HttpContext>,
    handle: TransportHandle,
    client: Option<reqwest::Client>,
    client_key: ClientKey,
    user_agent: String,
    timeout: Duration,
    connect_timeout: Duration,
    /// Last credential applied on this handle; auth configuration is
    /// only recomputed when it changes.
    previous_credential: Option<Credential>,
}

impl ReqwestTransport {
    pub fn new(context: Arc<HttpContext>) -> Self {
        let handle = next_handle();
        if let Some(handler) = context.config_handler() {
            handler.on_initialize(handle);
        }
        let user_agent = context.user_agent();
        Self {
            context,
            handle,
            client: None,
            client_key: ClientKey::default(),
            user_agent,
            timeout: Duration::ZERO,
            connect_timeout: Duration::ZERO,
            previous_credential: None,
        }
    }

    /// Builds (or reuses) the inner client for the effective settings.
    fn ensure_client(&mut self, proxy: &Option<ProxySettings>) -> Result<(), HttpResponse> {
        let key = ClientKey {
            proxy: proxy.clone(),
            user_agent: self.user_agent.clone(),
            timeout: self.timeout,
            connect_timeout: self.connect_timeout,
        };
        if self.client.is_some() && key == self.client_key {
            return Ok(());
        }

        let mut builder = reqwest::Client::builder()
            .redirect(Policy::limited(5))
            .gzip(true)
            .deflate(true)
            // peer verification is relaxed at this layer; policy can be
            // reintroduced above
            .danger_accept_invalid_certs(true)
            .user_agent(self.user_agent.clone());

        if self.timeout > Duration::ZERO {
            builder = builder.timeout(self.timeout);
        }
        if self.connect_timeout > Duration::ZERO {
            builder = builder.connect_timeout(self.connect_timeout);
        }

        if let Some(settings) = proxy {
            debug!(proxy = %settings.address(), "Using proxy");
            let mut proxy = reqwest::Proxy::all(format!("http://{}", settings.address()))
                .map_err(|e| {
                    HttpResponse::transport_failure(format!("Invalid proxy configuration: {}", e))
                })?;
            if let (Some(user), Some(pass)) = (&settings.username, &settings.password) {
                proxy = proxy.basic_auth(user, pass);
            }
            builder = builder.proxy(proxy);
        }

        let client = builder.build().map_err(|e| {
            HttpResponse::transport_failure(format!("Failed to create HTTP client: {}", e))
        })?;
        self.client = Some(client);
        self.client_key = key;
        Ok(())
    }
}

impl Transport for ReqwestTransport {
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
                let rewritten = rewriter.rewrite(&url);
                if rewritten != url {
                    trace!(from = %url, to = %rewritten, "Rewrote URL");
                    url = rewritten;
                }
            }

            // proxy precedence: request env, then context settings
            // (which folded the environment in at initialization)
            let proxy = env.proxy.clone().or_else(|| self.context.proxy());

            if let Err(failure) = self.ensure_client(&proxy) {
                return failure;
            }
            let client = self.client.as_ref().expect("client built above").clone();

            // credentials: longest-prefix match, reapplied only when
            // different from the last one used on this handle
            let store = env
                .credentials
                .clone()
                .unwrap_or_else(|| self.context.credentials());
            let credential = store.for_url(&url);
            if credential != self.previous_credential {
                debug!(url = %url, authenticated = credential.is_some(), "Request credentials changed");
                self.previous_credential = credential;
            }

            let mut builder = client.get(&url);
            for (name, value) in request.headers().iter() {
                builder = builder.header(name.to_ascii_lowercase(), value);
            }
            if let Some(cred) = &self.previous_credential {
                builder = builder.basic_auth(&cred.username, Some(&cred.password));
            }

            if let Some(handler) = self.context.config_handler() {
                handler.on_get(self.handle);
            }

            let response = match builder.send().await {
                Ok(r) => r,
                Err(e) => {
                    warn!(url = %url, error = %e, "HTTP request failed");
                    return if e.is_timeout() {
                        HttpResponse::canceled(e.to_string(), true)
                    } else if e.is_connect() && proxy.is_some() {
                        HttpResponse::transport_failure(format!("Proxy connect error {}", e))
                    } else {
                        HttpResponse::transport_failure(e.to_string())
                    };
                }
            };

            let code = self.context.maybe_simulate(response.status().as_u16() as u32);
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
                .and_then(super::parse_http_date);

            let mut part_headers = Headers::new();
            for (name, value) in response.headers().iter() {
                if let Ok(value) = value.to_str() {
                    part_headers.add(name.as_str(), value.trim());
                }
            }

            // stream the body, polling the progress callback between
            // chunks so cancellation can abort mid-transfer
            let total = response.content_length().unwrap_or(0);
            let mut body: Vec<u8> = Vec::with_capacity(total as usize);
            let mut response = response;
            loop {
                match response.chunk().await {
                    Ok(Some(chunk)) => {
                        body.extend_from_slice(&chunk);
                        if let Some(p) = progress {
                            if p.report_progress(body.len() as u64, total) || p.is_canceled() {
                                debug!(url = %url, "HTTP request canceled mid-stream");
                                return HttpResponse::canceled(
                                    "transfer canceled by progress callback",
                                    false,
                                );
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        return if e.is_timeout() {
                            HttpResponse::canceled(e.to_string(), true)
                        } else {
                            HttpResponse::transport_failure(e.to_string())
                        };
                    }
                }
            }

            let mut out = HttpResponse::new(code);
            out.set_mime_type(&mime);
            out.set_last_modified(last_modified);

            if mime.starts_with("multipart") {
                let boundary = boundary_from_mime(&mime).unwrap_or_else(|| "wcs".to_string());
                match decode_multipart(&body, &boundary) {
                    Ok(parts) => *out.parts_mut() = parts,
                    Err(e) => {
                        warn!(url = %url, error = %e, "Failed to decode multipart stream");
                        out.set_message(e.to_string());
                    }
                }
            } else {
                out.parts_mut().push(Part::new(part_headers, Bytes::from(body)));
            }

            out.set_duration(started.elapsed());
            self.context.record_request(out.duration());
            if self.context.debug() {
                debug!(
                    code,
                    mime = %mime,
                    url = %url,
                    duration_s = out.duration().as_secs_f64(),
                    "GET"
                );
            }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_key_change_detection() {
        let a = ClientKey {
            proxy: None,
            user_agent: "ua".into(),
            timeout: Duration::from_secs(10),
            connect_timeout: Duration::ZERO,
        };
        let same = a.clone();
        let mut different = a.clone();
        different.proxy = Some(ProxySettings::new("proxy", 8080));
        assert!(a == same);
        assert!(a != different);
    }

    #[tokio::test]
    async fn test_handles_are_unique() {
        let ctx = Arc::new(HttpContext::new());
        let a = ReqwestTransport::new(ctx.clone());
        let b = ReqwestTransport::new(ctx);
        assert_ne!(a.handle(), b.handle());
    }
}
