//! URL value type, canonical cache keys, and global rewrite hooks.

use std::sync::Arc;

/// Opaque URL plus the referrer used to resolve relative paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Url {
    full: String,
    referrer: Option<String>,
}

impl Url {
    /// Creates a URL. Spaces are percent-encoded up front so the value
    /// is wire-safe from the start.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            full: url.into().replace(' ', "%20"),
            referrer: None,
        }
    }

    /// Creates a URL with a referrer for relative-path resolution.
    pub fn with_referrer(url: impl Into<String>, referrer: impl Into<String>) -> Self {
        let mut u = Self::new(url);
        u.referrer = Some(referrer.into());
        u
    }

    /// Returns the full URL string.
    pub fn as_str(&self) -> &str {
        &self.full
    }

    /// Returns the referrer, if any.
    pub fn referrer(&self) -> Option<&str> {
        self.referrer.as_deref()
    }

    /// Resolves this URL against its referrer when it is relative.
    /// Absolute URLs (scheme prefix present) pass through unchanged.
    pub fn resolved(&self) -> String {
        if self.full.contains("://") {
            return self.full.clone();
        }
        match &self.referrer {
            Some(base) => {
                let dir = match base.rfind('/') {
                    Some(idx) => &base[..=idx],
                    None => "",
                };
                format!("{}{}", dir, self.full)
            }
            None => self.full.clone(),
        }
    }
}

impl From<&str> for Url {
    fn from(s: &str) -> Self {
        Url::new(s)
    }
}

impl From<String> for Url {
    fn from(s: String) -> Self {
        Url::new(s)
    }
}

impl std::fmt::Display for Url {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full)
    }
}

/// Produces the canonical cache key for a rendered URL: whitespace
/// trimmed, spaces percent-encoded. Every cache layer keys on this.
pub fn cache_key(rendered_url: &str) -> String {
    rendered_url.trim().replace(' ', "%20")
}

/// Hook applied to every URL immediately before dispatch.
pub trait UrlRewriter: Send + Sync {
    fn rewrite(&self, url: &str) -> String;
}

impl<F> UrlRewriter for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn rewrite(&self, url: &str) -> String {
        self(url)
    }
}

/// Opaque token identifying one transport handle, passed to
/// [`ConfigHandler`] callbacks so implementations can keep per-handle
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportHandle(pub u64);

/// Backend tuning hook: `on_initialize` runs once before a transport
/// handle's first use, `on_get` immediately before each GET.
pub trait ConfigHandler: Send + Sync {
    fn on_initialize(&self, handle: TransportHandle);
    fn on_get(&self, handle: TransportHandle);
}

/// Shared rewriter slot type used by the HTTP context.
pub type SharedRewriter = Arc<dyn UrlRewriter>;

/// Shared config-handler slot type used by the HTTP context.
pub type SharedConfigHandler = Arc<dyn ConfigHandler>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spaces_percent_encoded() {
        let url = Url::new("http://example.com/a file.png");
        assert_eq!(url.as_str(), "http://example.com/a%20file.png");
    }

    #[test]
    fn test_cache_key_trims_and_encodes() {
        assert_eq!(
            cache_key("  http://example.com/a file.png "),
            "http://example.com/a%20file.png"
        );
    }

    #[test]
    fn test_relative_resolution_against_referrer() {
        let url = Url::with_referrer("tiles/0/0/0.png", "http://example.com/maps/world.xml");
        assert_eq!(url.resolved(), "http://example.com/maps/tiles/0/0/0.png");
    }

    #[test]
    fn test_absolute_ignores_referrer() {
        let url = Url::with_referrer("http://other.com/x.png", "http://example.com/maps/world.xml");
        assert_eq!(url.resolved(), "http://other.com/x.png");
    }

    #[test]
    fn test_closure_rewriter() {
        let rewriter: SharedRewriter = Arc::new(|url: &str| url.replace("http://", "https://"));
        assert_eq!(rewriter.rewrite("http://example.com"), "https://example.com");
    }
}
