//! Process-wide HTTP settings as an explicit context object.
//!
//! An [`HttpContext`] gathers everything that was historically global:
//! user agent, timeouts, retry delay, proxy, fault-injection code,
//! debug flag, URL rewriter, backend config handler, transport
//! factory, decoder registry, and credentials. Contexts are
//! constructed explicitly and passed to clients; [`HttpContext::global`]
//! is the convenience default, initialized once from the environment.
//!
//! Environment variables recognized by [`HttpContext::from_env`]:
//!
//! | Variable | Effect |
//! |---|---|
//! | `OSG_CURL_PROXY` / `OSG_CURL_PROXYPORT` / `OSGEARTH_CURL_PROXYAUTH` | Proxy host, port (default 8080), `user:password`. |
//! | `OSGEARTH_USERAGENT` | Overrides the user-agent string. |
//! | `OSGEARTH_HTTP_TIMEOUT` / `OSGEARTH_HTTP_CONNECTTIMEOUT` | Transfer/connect timeouts in seconds. |
//! | `OSGEARTH_HTTP_RETRY_DELAY` | Retry delay in seconds (float). |
//! | `OSGEARTH_HTTP_DEBUG` | Verbose per-request logging. |
//! | `OSGEARTH_SIMULATE_HTTP_RESPONSE_CODE` | Inject this code on ~10% of requests. |
//! | `OSGEARTH_HTTP_DISABLE` | Force a simulated 500 on every request. |

use super::reqwest_backend::ReqwestTransport;
use super::transport::{CredentialStore, ProxySettings, Transport, TransportFactory};
use crate::decode::DecoderRegistry;
use crate::uri::{SharedConfigHandler, SharedRewriter};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;
use tracing::{info, warn};

/// Default retry delay suggested to callers on recoverable errors.
const DEFAULT_RETRY_DELAY_S: f64 = 0.5;

/// Builds the default user-agent string from the crate version:
/// `osgearth<major>.<minor>`.
fn default_user_agent() -> String {
    let mut parts = crate::VERSION.split('.');
    let major = parts.next().unwrap_or("0");
    let minor = parts.next().unwrap_or("0");
    format!("osgearth{}.{}", major, minor)
}

struct DefaultTransportFactory;

impl TransportFactory for DefaultTransportFactory {
    fn create(&self, context: Arc<HttpContext>) -> Box<dyn Transport> {
        Box::new(ReqwestTransport::new(context))
    }
}

/// Shared HTTP configuration. All accessors are thread-safe; callers
/// never synchronize around a context.
pub struct HttpContext {
    user_agent: RwLock<String>,
    timeout: RwLock<Duration>,
    connect_timeout: RwLock<Duration>,
    retry_delay_s: RwLock<f64>,
    proxy: RwLock<Option<ProxySettings>>,
    /// Simulated response code for fault injection; <= 0 disables.
    simulated_code: AtomicI64,
    /// Relaxed request counter driving the 1-in-10 injection residue.
    simulation_counter: AtomicU64,
    debug: AtomicBool,
    rewriter: RwLock<Option<SharedRewriter>>,
    config_handler: RwLock<Option<SharedConfigHandler>>,
    factory: RwLock<Arc<dyn TransportFactory>>,
    decoders: RwLock<Arc<DecoderRegistry>>,
    credentials: Arc<CredentialStore>,
    // verbose-mode statistics
    request_count: AtomicU64,
    total_duration_us: AtomicU64,
}

impl HttpContext {
    /// Creates a context with built-in defaults and no environment
    /// reads.
    pub fn new() -> Self {
        Self {
            user_agent: RwLock::new(default_user_agent()),
            timeout: RwLock::new(Duration::ZERO),
            connect_timeout: RwLock::new(Duration::ZERO),
            retry_delay_s: RwLock::new(DEFAULT_RETRY_DELAY_S),
            proxy: RwLock::new(None),
            simulated_code: AtomicI64::new(0),
            simulation_counter: AtomicU64::new(1),
            debug: AtomicBool::new(false),
            rewriter: RwLock::new(None),
            config_handler: RwLock::new(None),
            factory: RwLock::new(Arc::new(DefaultTransportFactory)),
            decoders: RwLock::new(Arc::new(DecoderRegistry::with_defaults())),
            credentials: Arc::new(CredentialStore::new()),
            request_count: AtomicU64::new(0),
            total_duration_us: AtomicU64::new(0),
        }
    }

    /// Creates a context initialized from the process environment. The
    /// environment is read once here, never per request.
    pub fn from_env() -> Self {
        let ctx = Self::new();

        if let Ok(agent) = std::env::var("OSGEARTH_USERAGENT") {
            ctx.set_user_agent(&agent);
        }

        if let Ok(code) = std::env::var("OSGEARTH_SIMULATE_HTTP_RESPONSE_CODE") {
            let code = code.trim().parse().unwrap_or(404);
            warn!(code, "Simulating a network error with this response code");
            ctx.set_simulated_code(Some(code));
        }

        if std::env::var("OSGEARTH_HTTP_DISABLE").is_ok() {
            warn!("HTTP traffic disabled; every request returns a simulated 500");
            ctx.set_simulated_code(Some(500));
        }

        if std::env::var("OSGEARTH_HTTP_DEBUG").is_ok() {
            info!("HTTP debugging enabled");
            ctx.set_debug(true);
        }

        if let Ok(secs) = std::env::var("OSGEARTH_HTTP_TIMEOUT") {
            if let Ok(secs) = secs.trim().parse::<u64>() {
                ctx.set_timeout(Duration::from_secs(secs));
            }
        }

        if let Ok(secs) = std::env::var("OSGEARTH_HTTP_CONNECTTIMEOUT") {
            if let Ok(secs) = secs.trim().parse::<u64>() {
                ctx.set_connect_timeout(Duration::from_secs(secs));
            }
        }

        if let Ok(delay) = std::env::var("OSGEARTH_HTTP_RETRY_DELAY") {
            if let Ok(delay) = delay.trim().parse::<f64>() {
                ctx.set_retry_delay(delay);
            }
        }

        if let Some(proxy) = ProxySettings::from_env() {
            ctx.set_proxy(Some(proxy));
        }

        ctx
    }

    /// The process-default context, initialized from the environment on
    /// first use.
    pub fn global() -> Arc<HttpContext> {
        static GLOBAL: OnceLock<Arc<HttpContext>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(HttpContext::from_env())).clone()
    }

    pub fn user_agent(&self) -> String {
        self.user_agent.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_user_agent(&self, agent: &str) {
        *self.user_agent.write().unwrap_or_else(|e| e.into_inner()) = agent.to_string();
    }

    /// Transfer timeout; zero means backend default.
    pub fn timeout(&self) -> Duration {
        *self.timeout.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_timeout(&self, timeout: Duration) {
        *self.timeout.write().unwrap_or_else(|e| e.into_inner()) = timeout;
    }

    /// Connect timeout; zero means backend default.
    pub fn connect_timeout(&self) -> Duration {
        *self.connect_timeout.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_connect_timeout(&self, timeout: Duration) {
        *self.connect_timeout.write().unwrap_or_else(|e| e.into_inner()) = timeout;
    }

    /// Delay in seconds suggested to callers when a recoverable error
    /// occurs.
    pub fn retry_delay(&self) -> f64 {
        *self.retry_delay_s.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_retry_delay(&self, seconds: f64) {
        *self.retry_delay_s.write().unwrap_or_else(|e| e.into_inner()) = seconds;
    }

    pub fn proxy(&self) -> Option<ProxySettings> {
        self.proxy.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_proxy(&self, proxy: Option<ProxySettings>) {
        *self.proxy.write().unwrap_or_else(|e| e.into_inner()) = proxy;
    }

    pub fn debug(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }

    pub fn set_debug(&self, debug: bool) {
        self.debug.store(debug, Ordering::Relaxed);
    }

    pub fn simulated_code(&self) -> Option<u32> {
        let code = self.simulated_code.load(Ordering::Relaxed);
        (code > 0).then_some(code as u32)
    }

    pub fn set_simulated_code(&self, code: Option<u32>) {
        self.simulated_code
            .store(code.map(|c| c as i64).unwrap_or(0), Ordering::Relaxed);
    }

    /// Applies fault injection: when a simulated code is configured,
    /// one request in ten gets its status replaced by it.
    pub(crate) fn maybe_simulate(&self, real_code: u32) -> u32 {
        match self.simulated_code() {
            Some(sim) => {
                let tick = self.simulation_counter.fetch_add(1, Ordering::Relaxed);
                if tick % 10 == 0 {
                    sim
                } else {
                    real_code
                }
            }
            None => real_code,
        }
    }

    pub fn rewriter(&self) -> Option<SharedRewriter> {
        self.rewriter.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_rewriter(&self, rewriter: Option<SharedRewriter>) {
        *self.rewriter.write().unwrap_or_else(|e| e.into_inner()) = rewriter;
    }

    pub fn config_handler(&self) -> Option<SharedConfigHandler> {
        self.config_handler
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_config_handler(&self, handler: Option<SharedConfigHandler>) {
        *self.config_handler.write().unwrap_or_else(|e| e.into_inner()) = handler;
    }

    pub fn transport_factory(&self) -> Arc<dyn TransportFactory> {
        self.factory.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Replaces the backend factory. Clients created afterwards use the
    /// new backend.
    pub fn set_transport_factory(&self, factory: Arc<dyn TransportFactory>) {
        *self.factory.write().unwrap_or_else(|e| e.into_inner()) = factory;
    }

    pub fn decoders(&self) -> Arc<DecoderRegistry> {
        self.decoders.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_decoders(&self, registry: Arc<DecoderRegistry>) {
        *self.decoders.write().unwrap_or_else(|e| e.into_inner()) = registry;
    }

    /// Process-level credential map, consulted when the request env
    /// does not carry its own.
    pub fn credentials(&self) -> Arc<CredentialStore> {
        self.credentials.clone()
    }

    /// Records one completed request for the verbose statistics line.
    pub(crate) fn record_request(&self, duration: Duration) {
        if !self.debug() {
            return;
        }
        let count = self.request_count.fetch_add(1, Ordering::Relaxed) + 1;
        let total = self
            .total_duration_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed)
            + duration.as_micros() as u64;
        if count % 60 == 0 {
            info!(
                requests = count,
                avg_duration_ms = (total / count) as f64 / 1000.0,
                "HTTP request statistics"
            );
        }
    }
}

impl Default for HttpContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_user_agent_from_version() {
        let ctx = HttpContext::new();
        let agent = ctx.user_agent();
        assert!(agent.starts_with("osgearth"));
        assert!(agent.contains('.'));
    }

    #[test]
    fn test_simulation_disabled_by_default() {
        let ctx = HttpContext::new();
        assert_eq!(ctx.simulated_code(), None);
        for _ in 0..50 {
            assert_eq!(ctx.maybe_simulate(200), 200);
        }
    }

    #[test]
    fn test_simulation_fires_one_in_ten() {
        let ctx = HttpContext::new();
        ctx.set_simulated_code(Some(503));
        let injected = (0..100).filter(|_| ctx.maybe_simulate(200) == 503).count();
        assert_eq!(injected, 10);
    }

    #[test]
    fn test_settings_round_trip() {
        let ctx = HttpContext::new();
        ctx.set_timeout(Duration::from_secs(30));
        ctx.set_connect_timeout(Duration::from_secs(5));
        ctx.set_retry_delay(2.5);
        ctx.set_user_agent("test-agent");
        assert_eq!(ctx.timeout(), Duration::from_secs(30));
        assert_eq!(ctx.connect_timeout(), Duration::from_secs(5));
        assert!((ctx.retry_delay() - 2.5).abs() < 1e-9);
        assert_eq!(ctx.user_agent(), "test-agent");
    }

    #[test]
    fn test_proxy_slot() {
        let ctx = HttpContext::new();
        assert!(ctx.proxy().is_none());
        ctx.set_proxy(Some(ProxySettings::new("proxy", 8080)));
        assert_eq!(ctx.proxy().unwrap().host, "proxy");
    }
}
