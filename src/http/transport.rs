//! Wire transport contract, proxy/credential types, and the
//! process-replaceable backend factory.
//!
//! A [`Transport`] performs exactly one HTTP GET per
//! [`Transport::do_get`] call. Backends are interchangeable through a
//! [`TransportFactory`]; the default factory produces
//! [`ReqwestTransport`](super::ReqwestTransport) handles.

use super::request::HttpRequest;
use super::response::HttpResponse;
use crate::cache::CacheContext;
use crate::progress::Progress;
use crate::uri::TransportHandle;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Allocates a unique handle id for a new transport instance.
pub(crate) fn next_handle() -> TransportHandle {
    TransportHandle(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
}

/// Proxy configuration, from explicit settings or the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxySettings {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
        }
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// `host:port` address string.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `user:password` pair when both are set.
    pub fn auth(&self) -> Option<String> {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => Some(format!("{}:{}", u, p)),
            _ => None,
        }
    }

    /// Reads proxy settings from `OSG_CURL_PROXY`,
    /// `OSG_CURL_PROXYPORT` (default 8080), and
    /// `OSGEARTH_CURL_PROXYAUTH` (`user:password`).
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("OSG_CURL_PROXY").ok()?;
        if host.is_empty() {
            return None;
        }
        let port = std::env::var("OSG_CURL_PROXYPORT")
            .ok()
            .and_then(|p| p.trim().parse().ok())
            .unwrap_or(8080);
        let mut settings = Self::new(host, port);
        if let Ok(auth) = std::env::var("OSGEARTH_CURL_PROXYAUTH") {
            if let Some((user, pass)) = auth.split_once(':') {
                settings = settings.with_auth(user, pass);
            }
        }
        Some(settings)
    }
}

/// Basic-auth credential applied to matching URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// URL-prefix keyed credential map. Lookup returns the credential with
/// the longest matching prefix, so more specific endpoints win.
#[derive(Debug, Default)]
pub struct CredentialStore {
    entries: RwLock<Vec<(String, Credential)>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a credential for all URLs starting with `prefix`.
    pub fn insert(&self, prefix: impl Into<String>, credential: Credential) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.push((prefix.into(), credential));
    }

    /// Finds the credential whose prefix is the longest match for `url`.
    pub fn for_url(&self, url: &str) -> Option<Credential> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .filter(|(prefix, _)| url.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, cred)| cred.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }
}

/// Per-request environment: overrides and collaborators threaded
/// through a single `do_get`.
#[derive(Clone, Default)]
pub struct RequestEnv {
    /// Proxy override; takes precedence over context and environment
    /// settings.
    pub proxy: Option<ProxySettings>,
    /// Credential map override for this request.
    pub credentials: Option<Arc<CredentialStore>>,
    /// Cache and policy; absent means no caching for this request.
    pub cache: Option<CacheContext>,
}

impl RequestEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache(mut self, cache: CacheContext) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_proxy(mut self, proxy: ProxySettings) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn with_credentials(mut self, credentials: Arc<CredentialStore>) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

/// One-GET wire backend.
///
/// Implementations keep per-handle state (last-used credential, built
/// connection pool) and reconfigure only when the effective settings
/// change between calls.
pub trait Transport: Send {
    /// Performs exactly one HTTP GET. Never returns `Err`: transport
    /// failures surface as a code-0 [`HttpResponse`] with a message
    /// and/or the canceled flag.
    fn do_get<'a>(
        &'a mut self,
        request: &'a HttpRequest,
        env: &'a RequestEnv,
        progress: Option<&'a dyn Progress>,
    ) -> BoxFuture<'a, HttpResponse>;

    fn set_user_agent(&mut self, agent: &str);

    /// Transfer timeout; zero leaves the backend default in place.
    fn set_timeout(&mut self, timeout: Duration);

    /// Connect timeout; zero leaves the backend default in place.
    fn set_connect_timeout(&mut self, timeout: Duration);

    /// Opaque identity of this handle, passed to config-handler hooks.
    fn handle(&self) -> TransportHandle;
}

/// Produces transport handles. The active factory is process-global
/// and replaceable through
/// [`HttpContext::set_transport_factory`](super::HttpContext::set_transport_factory),
/// so alternate backends (HTTP/2, QUIC, offline stubs, test scripts)
/// drop in without touching call sites.
pub trait TransportFactory: Send + Sync {
    fn create(&self, context: Arc<super::HttpContext>) -> Box<dyn Transport>;
}
