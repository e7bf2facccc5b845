//! HTTP request model: URL, ordered query parameters, headers.

use crate::config::Config;
use crate::uri::Url;
use std::time::SystemTime;

/// Ordered header map with case-insensitive lookup.
///
/// Insertion order is preserved; names compare case-insensitively and
/// are lowercased when emitted on the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a header, replacing any existing value for the same name.
    pub fn set(&mut self, name: &str, value: impl ToString) {
        match self
            .entries
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            Some((_, v)) => *v = value.to_string(),
            None => self.entries.push((name.to_string(), value.to_string())),
        }
    }

    /// Appends a header without replacing existing values.
    pub fn add(&mut self, name: &str, value: impl ToString) {
        self.entries.push((name.to_string(), value.to_string()));
    }

    /// Returns the first value for the given name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Removes all values for the given name.
    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Captures these headers into a config subtree with the given key.
    pub fn to_config(&self, key: &str) -> Config {
        let mut conf = Config::new(key);
        for (name, value) in &self.entries {
            conf.add(name, value);
        }
        conf
    }

    /// Applies the children of a config subtree as headers.
    pub fn apply_config(&mut self, conf: &Config) {
        for child in conf.children_all() {
            if let Some(value) = child.value() {
                self.set(child.key(), value);
            }
        }
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = (&'a str, &'a str);
    type IntoIter = Box<dyn Iterator<Item = (&'a str, &'a str)> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

/// One HTTP GET request: URL, ordered query parameters, headers, and
/// an optional If-Modified-Since timestamp for conditional fetches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpRequest {
    url: Url,
    parameters: Vec<(String, String)>,
    headers: Headers,
}

impl HttpRequest {
    pub fn new(url: impl Into<Url>) -> Self {
        Self {
            url: url.into(),
            parameters: Vec::new(),
            headers: Headers::new(),
        }
    }

    /// Returns the base URL without query parameters appended.
    pub fn base_url(&self) -> &Url {
        &self.url
    }

    /// Appends a query parameter. Insertion order is preserved in the
    /// rendered URL.
    pub fn add_parameter(&mut self, name: &str, value: impl ToString) {
        self.parameters.push((name.to_string(), value.to_string()));
    }

    pub fn parameters(&self) -> &[(String, String)] {
        &self.parameters
    }

    pub fn add_header(&mut self, name: &str, value: impl ToString) {
        self.headers.set(name, value);
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Requests conditional fetch: sets the `If-Modified-Since` header
    /// from the given timestamp.
    pub fn set_if_modified_since(&mut self, when: SystemTime) {
        self.headers
            .set("If-Modified-Since", super::format_http_date(when));
    }

    /// Returns the If-Modified-Since timestamp, when set.
    pub fn if_modified_since(&self) -> Option<SystemTime> {
        self.headers
            .get("If-Modified-Since")
            .and_then(super::parse_http_date)
    }

    /// Renders the wire URL: the base URL with parameters appended as
    /// `?k=v&…` in insertion order. A `?` already present in the base
    /// switches the first separator to `&`.
    pub fn full_url(&self) -> String {
        if self.parameters.is_empty() {
            return self.url.as_str().to_string();
        }
        let mut out = String::from(self.url.as_str());
        let mut first = !self.url.as_str().contains('?');
        for (name, value) in &self.parameters {
            out.push(if first { '?' } else { '&' });
            first = false;
            out.push_str(name);
            out.push('=');
            out.push_str(value);
        }
        out
    }

    /// Captures the request headers as a config subtree.
    pub fn headers_as_config(&self) -> Config {
        self.headers.to_config("request-headers")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn test_full_url_without_parameters() {
        let request = HttpRequest::new("http://example.com/tiles/0/0/0.png");
        assert_eq!(request.full_url(), "http://example.com/tiles/0/0/0.png");
    }

    #[test]
    fn test_full_url_preserves_parameter_order() {
        let mut request = HttpRequest::new("http://example.com/wms");
        request.add_parameter("service", "WMS");
        request.add_parameter("request", "GetMap");
        request.add_parameter("bbox", "0,0,10,10");
        assert_eq!(
            request.full_url(),
            "http://example.com/wms?service=WMS&request=GetMap&bbox=0,0,10,10"
        );
    }

    #[test]
    fn test_full_url_with_existing_query() {
        let mut request = HttpRequest::new("http://example.com/tiles?g=1");
        request.add_parameter("key", "abc");
        assert_eq!(request.full_url(), "http://example.com/tiles?g=1&key=abc");
    }

    #[test]
    fn test_rendered_url_begins_with_base() {
        let mut request = HttpRequest::new("http://example.com/a");
        for i in 0..8 {
            request.add_parameter(&format!("p{}", i), i);
        }
        assert!(request.full_url().starts_with("http://example.com/a"));
    }

    #[test]
    fn test_headers_case_insensitive() {
        let mut headers = Headers::new();
        headers.set("Content-Type", "image/png");
        assert_eq!(headers.get("content-type"), Some("image/png"));
        headers.set("CONTENT-TYPE", "image/jpeg");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("Content-Type"), Some("image/jpeg"));
    }

    #[test]
    fn test_if_modified_since_round_trip() {
        let mut request = HttpRequest::new("http://example.com/a.png");
        let when = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        request.set_if_modified_since(when);
        assert!(request.headers().get("If-Modified-Since").is_some());
        assert_eq!(request.if_modified_since(), Some(when));
    }

    #[test]
    fn test_headers_config_round_trip() {
        let mut headers = Headers::new();
        headers.set("content-type", "image/png");
        headers.set("cache-control", "no-cache");
        let conf = headers.to_config("request-headers");
        let mut restored = Headers::new();
        restored.apply_config(&conf);
        assert_eq!(restored.get("content-type"), Some("image/png"));
        assert_eq!(restored.get("cache-control"), Some("no-cache"));
    }
}
