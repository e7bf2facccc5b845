//! Generic hierarchical key/value container.
//!
//! A [`Config`] is a recursive tree of keyed nodes used throughout the
//! library for options, metadata, and request/response headers. Keys
//! compare case-insensitively; child order is preserved; values are
//! stored as strings and parsed on demand through typed accessors with
//! caller-supplied fallbacks.
//!
//! Serialization to and from JSON is lossless: children live in an
//! ordered array, so `set -> to_json -> from_json` yields a
//! structurally equal tree.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Sub;
use std::str::FromStr;

fn is_false(v: &bool) -> bool {
    !*v
}

/// Recursive key/value tree with ordered children.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<Config>,

    /// Hint that the value was set from a numeric type.
    #[serde(default, rename = "number", skip_serializing_if = "is_false")]
    is_number: bool,

    /// Base path for resolving relative paths stored in this subtree.
    /// Not part of the serialized form.
    #[serde(skip)]
    referrer: Option<String>,
}

impl Config {
    /// Creates an empty config node with the given key.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    /// Creates a config node with a key and a value.
    pub fn with_value(key: impl Into<String>, value: impl ToString) -> Self {
        Self {
            key: key.into(),
            value: Some(value.to_string()),
            ..Default::default()
        }
    }

    /// Returns this node's key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Replaces this node's key.
    pub fn set_key(&mut self, key: impl Into<String>) {
        self.key = key.into();
    }

    /// Returns this node's own value, if set.
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Sets this node's own value.
    pub fn set_value(&mut self, value: impl ToString) {
        self.value = Some(value.to_string());
    }

    /// Returns true if this node was set from a numeric type.
    pub fn is_number(&self) -> bool {
        self.is_number
    }

    /// Returns the referrer used to resolve relative paths in this subtree.
    pub fn referrer(&self) -> Option<&str> {
        self.referrer.as_deref()
    }

    /// Sets the referrer on this node. New children added afterwards
    /// inherit it.
    pub fn set_referrer(&mut self, referrer: impl Into<String>) {
        self.referrer = Some(referrer.into());
    }

    /// Returns true if this node has no value and no children.
    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.children.is_empty()
    }

    /// Returns all children in insertion order.
    pub fn children_all(&self) -> &[Config] {
        &self.children
    }

    /// Returns true if a child with the given key exists.
    pub fn has(&self, key: &str) -> bool {
        self.children.iter().any(|c| c.key.eq_ignore_ascii_case(key))
    }

    /// Sets `key` to `value`, replacing the first existing child with a
    /// matching key or appending a new one.
    pub fn set(&mut self, key: &str, value: impl ToString) {
        match self
            .children
            .iter_mut()
            .find(|c| c.key.eq_ignore_ascii_case(key))
        {
            Some(child) => {
                child.value = Some(value.to_string());
                child.is_number = false;
            }
            None => self.add(key, value),
        }
    }

    /// Sets `key` to a numeric value, marking the number hint.
    pub fn set_number(&mut self, key: &str, value: f64) {
        self.set(key, value);
        if let Some(child) = self
            .children
            .iter_mut()
            .find(|c| c.key.eq_ignore_ascii_case(key))
        {
            child.is_number = true;
        }
    }

    /// Appends a child with the given key and value. Duplicate keys are
    /// allowed; insertion order is preserved.
    pub fn add(&mut self, key: &str, value: impl ToString) {
        let mut child = Config::with_value(key, value);
        child.referrer = self.referrer.clone();
        self.children.push(child);
    }

    /// Appends a keyed child with no value.
    pub fn add_key(&mut self, key: &str) {
        let mut child = Config::new(key);
        child.referrer = self.referrer.clone();
        self.children.push(child);
    }

    /// Appends a fully formed child node and returns a mutable
    /// reference to it.
    pub fn add_child(&mut self, mut child: Config) -> &mut Config {
        if child.referrer.is_none() {
            child.referrer = self.referrer.clone();
        }
        self.children.push(child);
        self.children.last_mut().unwrap()
    }

    /// Returns the value of the first child with the given key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.child(key).and_then(|c| c.value())
    }

    /// Returns the first child with the given key.
    pub fn child(&self, key: &str) -> Option<&Config> {
        self.children
            .iter()
            .find(|c| c.key.eq_ignore_ascii_case(key))
    }

    /// Returns all children with the given key, in insertion order.
    pub fn children(&self, key: &str) -> impl Iterator<Item = &Config> {
        let key = key.to_ascii_lowercase();
        self.children
            .iter()
            .filter(move |c| c.key.to_ascii_lowercase() == key)
    }

    /// Searches for a node with the given key. With `recursive`, the
    /// search descends depth-first through the whole subtree.
    pub fn find(&self, key: &str, recursive: bool) -> Option<&Config> {
        if self.key.eq_ignore_ascii_case(key) {
            return Some(self);
        }
        for child in &self.children {
            if child.key.eq_ignore_ascii_case(key) {
                return Some(child);
            }
        }
        if recursive {
            for child in &self.children {
                if let Some(found) = child.find(key, true) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Removes all children with the given key, returning how many were
    /// removed.
    pub fn remove(&mut self, key: &str) -> usize {
        let before = self.children.len();
        self.children.retain(|c| !c.key.eq_ignore_ascii_case(key));
        before - self.children.len()
    }

    /// Deep-merges `other` into this tree. Children of `other` whose
    /// key exists here merge recursively (other's value wins); the
    /// rest are appended.
    pub fn merge(&mut self, other: &Config) {
        if other.value.is_some() {
            self.value = other.value.clone();
            self.is_number = other.is_number;
        }
        for theirs in &other.children {
            match self
                .children
                .iter_mut()
                .find(|c| c.key.eq_ignore_ascii_case(&theirs.key))
            {
                Some(mine) => mine.merge(theirs),
                None => {
                    self.children.push(theirs.clone());
                }
            }
        }
    }

    /// Parses this node's own value, falling back when absent or
    /// unparseable.
    pub fn value_as<T: FromStr>(&self, fallback: T) -> T {
        self.value
            .as_deref()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(fallback)
    }

    /// Parses the value of the first child with the given key, falling
    /// back when absent or unparseable.
    pub fn get_as<T: FromStr>(&self, key: &str, fallback: T) -> T {
        match self.get(key) {
            Some(v) => v.trim().parse().unwrap_or(fallback),
            None => fallback,
        }
    }

    /// Reads a percentage-encoded value (`"75%"`) as a fraction
    /// (`0.75`). Plain numbers pass through unchanged.
    pub fn get_ratio(&self, key: &str, fallback: f64) -> f64 {
        match self.get(key) {
            Some(raw) => {
                let raw = raw.trim();
                if let Some(num) = raw.strip_suffix('%') {
                    num.trim().parse::<f64>().map(|n| n / 100.0).unwrap_or(fallback)
                } else {
                    raw.parse().unwrap_or(fallback)
                }
            }
            None => fallback,
        }
    }

    /// Stores a string array under `key`, comma-delimited. Values that
    /// contain a comma are double-quoted.
    pub fn set_vec(&mut self, key: &str, values: &[&str]) {
        let encoded = values
            .iter()
            .map(|v| {
                if v.contains(',') {
                    format!("\"{}\"", v)
                } else {
                    v.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(",");
        self.set(key, encoded);
    }

    /// Reads a string array stored by [`set_vec`](Self::set_vec).
    pub fn get_vec(&self, key: &str) -> Vec<String> {
        let raw = match self.get(key) {
            Some(raw) => raw,
            None => return Vec::new(),
        };
        let mut out = Vec::new();
        let mut current = String::new();
        let mut quoted = false;
        for ch in raw.chars() {
            match ch {
                '"' => quoted = !quoted,
                ',' if !quoted => {
                    out.push(std::mem::take(&mut current));
                }
                _ => current.push(ch),
            }
        }
        if !current.is_empty() || !out.is_empty() || !raw.is_empty() {
            out.push(current);
        }
        out
    }

    /// Serializes this tree to compact JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Serializes this tree to indented JSON.
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Parses a tree serialized by [`to_json`](Self::to_json).
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Structural equality: key, value, children, and the number hint.
/// The referrer is a local resolution aid that never serializes, so it
/// takes no part in comparison; a tree always equals its own JSON
/// round-trip.
impl PartialEq for Config {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
            && self.value == other.value
            && self.is_number == other.is_number
            && self.children == other.children
    }
}

/// `a - b`: removes from `a` every child subtree that exists
/// identically in `b`.
impl Sub for &Config {
    type Output = Config;

    fn sub(self, rhs: &Config) -> Config {
        let mut out = self.clone();
        out.children.retain(|mine| {
            !rhs.children
                .iter()
                .any(|theirs| theirs.key.eq_ignore_ascii_case(&mine.key) && theirs == mine)
        });
        out
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_round_trip() {
        let mut conf = Config::new("options");
        conf.set("format", "png");
        assert_eq!(conf.get("format"), Some("png"));
    }

    #[test]
    fn test_set_replaces_existing() {
        let mut conf = Config::new("options");
        conf.set("format", "png");
        conf.set("format", "jpeg");
        assert_eq!(conf.get("format"), Some("jpeg"));
        assert_eq!(conf.children("format").count(), 1);
    }

    #[test]
    fn test_add_allows_duplicates_in_order() {
        let mut conf = Config::new("headers");
        conf.add("accept", "image/png");
        conf.add("accept", "image/jpeg");
        let values: Vec<_> = conf.children("accept").filter_map(|c| c.value()).collect();
        assert_eq!(values, vec!["image/png", "image/jpeg"]);
    }

    #[test]
    fn test_keys_compare_case_insensitively() {
        let mut conf = Config::new("headers");
        conf.set("Content-Type", "text/plain");
        assert_eq!(conf.get("content-type"), Some("text/plain"));
        assert!(conf.has("CONTENT-TYPE"));
    }

    #[test]
    fn test_get_as_with_fallback() {
        let mut conf = Config::new("options");
        conf.set("timeout", "30");
        conf.set("bogus", "not a number");
        assert_eq!(conf.get_as::<u32>("timeout", 5), 30);
        assert_eq!(conf.get_as::<u32>("bogus", 5), 5);
        assert_eq!(conf.get_as::<u32>("missing", 5), 5);
    }

    #[test]
    fn test_number_hint() {
        let mut conf = Config::new("options");
        conf.set_number("opacity", 0.5);
        assert!(conf.child("opacity").unwrap().is_number());
        conf.set("opacity", "half");
        assert!(!conf.child("opacity").unwrap().is_number());
    }

    #[test]
    fn test_percentage_as_ratio() {
        let mut conf = Config::new("style");
        conf.set("opacity", "75%");
        conf.set("scale", "1.5");
        assert!((conf.get_ratio("opacity", 0.0) - 0.75).abs() < 1e-9);
        assert!((conf.get_ratio("scale", 0.0) - 1.5).abs() < 1e-9);
        assert!((conf.get_ratio("missing", 0.25) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_vec_round_trip_with_commas() {
        let mut conf = Config::new("layers");
        conf.set_vec("names", &["roads", "water,inland", "parks"]);
        assert_eq!(
            conf.get_vec("names"),
            vec!["roads".to_string(), "water,inland".to_string(), "parks".to_string()]
        );
    }

    #[test]
    fn test_find_recursive() {
        let mut root = Config::new("map");
        let mut layer = Config::new("layer");
        layer.set("url", "http://example.com/tiles");
        root.add_child(layer);
        assert!(root.find("url", false).is_none());
        assert_eq!(
            root.find("url", true).and_then(|c| c.value()),
            Some("http://example.com/tiles")
        );
    }

    #[test]
    fn test_merge_deep() {
        let mut a = Config::new("root");
        a.set("keep", "1");
        let mut nested_a = Config::new("nested");
        nested_a.set("x", "old");
        a.add_child(nested_a);

        let mut b = Config::new("root");
        let mut nested_b = Config::new("nested");
        nested_b.set("x", "new");
        nested_b.set("y", "2");
        b.add_child(nested_b);
        b.set("extra", "3");

        a.merge(&b);
        assert_eq!(a.get("keep"), Some("1"));
        assert_eq!(a.get("extra"), Some("3"));
        let nested = a.child("nested").unwrap();
        assert_eq!(nested.get("x"), Some("new"));
        assert_eq!(nested.get("y"), Some("2"));
    }

    #[test]
    fn test_sub_removes_identical_subtrees() {
        let mut a = Config::new("root");
        a.set("same", "1");
        a.set("differs", "a");

        let mut b = Config::new("root");
        b.set("same", "1");
        b.set("differs", "b");

        let diff = &a - &b;
        assert!(!diff.has("same"));
        assert_eq!(diff.get("differs"), Some("a"));
    }

    #[test]
    fn test_json_round_trip_preserves_structure() {
        let mut conf = Config::new("response");
        conf.add("content-type", "image/png");
        conf.add("cache-control", "max-age=3600");
        conf.set_number("age", 42.0);
        let mut nested = Config::new("request");
        nested.add("uri", "http://example.com/a.png");
        conf.add_child(nested);

        let parsed = Config::from_json(&conf.to_json()).unwrap();
        assert_eq!(parsed, conf);
        // child order survives
        let keys: Vec<_> = parsed.children_all().iter().map(|c| c.key()).collect();
        assert_eq!(keys, vec!["content-type", "cache-control", "age", "request"]);
    }

    #[test]
    fn test_referrer_does_not_affect_equality() {
        let mut conf = Config::new("layer");
        conf.set_referrer("/maps/world.earth");
        conf.add("url", "relative/path.png");

        // the referrer never serializes, so the round-trip drops it;
        // the trees still compare equal by structure
        let parsed = Config::from_json(&conf.to_json()).unwrap();
        assert!(parsed.referrer().is_none());
        assert_eq!(parsed, conf);

        // identical subtrees with different referrers subtract away
        let mut bare = Config::new("layer");
        bare.add("url", "relative/path.png");
        let diff = &conf - &bare;
        assert!(!diff.has("url"));
    }

    #[test]
    fn test_referrer_inherited_by_added_children() {
        let mut conf = Config::new("layer");
        conf.set_referrer("/maps/world.earth");
        conf.add("url", "relative/path.png");
        assert_eq!(conf.child("url").unwrap().referrer(), Some("/maps/world.earth"));
    }
}
