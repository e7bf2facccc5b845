//! Keygated tile fetch pipeline.
//!
//! Maps tile keys onto HTTP requests through a URL template, runs them
//! through a pooled [`HttpClient`], and serializes concurrent interest
//! in the same key behind a [`Keygate`] so at most one transport call
//! is ever in flight per key. Results are `Arc`-shared so every
//! coalesced waiter receives the same decoded payload.

use super::keygate::{GateEntry, Keygate, KeygateStats};
use super::template::UrlTemplate;
use super::{Profile, TileKey};
use crate::http::{ClientPool, HttpContext, HttpRequest, RequestEnv};
use crate::progress::Progress;
use crate::result::ReadResult;
use std::sync::Arc;
use tracing::trace;

/// Tile fetch pipeline over one URL template.
pub struct TilePipeline {
    template: UrlTemplate,
    profile: Profile,
    clients: Arc<ClientPool>,
    env: RequestEnv,
    image_gate: Keygate<TileKey, Arc<ReadResult>>,
}

impl TilePipeline {
    /// Starts building a pipeline for the given URL template.
    pub fn builder(template: impl Into<UrlTemplate>) -> TilePipelineBuilder {
        TilePipelineBuilder {
            template: template.into(),
            profile: Profile::WebMercator,
            context: None,
            env: RequestEnv::default(),
        }
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    pub fn template(&self) -> &UrlTemplate {
        &self.template
    }

    /// Coalescing effectiveness counters.
    pub fn stats(&self) -> KeygateStats {
        self.image_gate.stats()
    }

    /// Builds the concrete request for one tile key.
    pub fn request_for(&self, key: &TileKey) -> HttpRequest {
        HttpRequest::new(self.template.url_for(key))
    }

    /// Fetches and decodes one tile image.
    ///
    /// Concurrent calls for the same key are serialized: the first
    /// arrival performs the fetch, later arrivals wait and share its
    /// result. If the running fetch is torn down without publishing,
    /// waiters re-register and fetch themselves (usually hitting the
    /// cache).
    pub async fn fetch_image(
        &self,
        key: &TileKey,
        progress: Option<&dyn Progress>,
    ) -> Arc<ReadResult> {
        loop {
            match self.image_gate.register(*key) {
                GateEntry::Runner => {
                    trace!(key = %key, "Fetching tile");
                    // reap the bucket if this task is dropped mid-fetch,
                    // so waiters re-register instead of hanging
                    let mut guard = RunnerGuard {
                        gate: &self.image_gate,
                        key: *key,
                        published: false,
                    };
                    let result = Arc::new(self.fetch_direct(key, progress).await);
                    guard.published = true;
                    self.image_gate.complete(key, result.clone());
                    return result;
                }
                waiter => {
                    if let Some(result) = waiter.wait().await {
                        return result;
                    }
                    // runner aborted; take over on the next iteration
                }
            }
        }
    }

    /// Fetches one tile as text (metadata documents, vector tiles
    /// served as JSON, and the like). Not keygated: text reads are
    /// rare and cheap relative to imagery.
    pub async fn fetch_string(
        &self,
        key: &TileKey,
        progress: Option<&dyn Progress>,
    ) -> ReadResult {
        let request = self.request_for(key);
        let mut client = self.clients.acquire();
        client.read_string(&request, &self.env, progress).await
    }

    async fn fetch_direct(&self, key: &TileKey, progress: Option<&dyn Progress>) -> ReadResult {
        let request = self.request_for(key);
        let mut client = self.clients.acquire();
        client.read_image(&request, &self.env, progress).await
    }
}

/// Aborts the in-flight bucket when a runner is torn down before
/// publishing its result.
struct RunnerGuard<'a> {
    gate: &'a Keygate<TileKey, Arc<ReadResult>>,
    key: TileKey,
    published: bool,
}

impl Drop for RunnerGuard<'_> {
    fn drop(&mut self) {
        if !self.published {
            self.gate.abort(&self.key);
        }
    }
}

/// Builder for [`TilePipeline`].
pub struct TilePipelineBuilder {
    template: UrlTemplate,
    profile: Profile,
    context: Option<Arc<HttpContext>>,
    env: RequestEnv,
}

impl TilePipelineBuilder {
    pub fn profile(mut self, profile: Profile) -> Self {
        self.profile = profile;
        self
    }

    /// HTTP context for the pipeline's client pool; defaults to the
    /// process context.
    pub fn context(mut self, context: Arc<HttpContext>) -> Self {
        self.context = Some(context);
        self
    }

    /// Request environment (cache, policy, proxy, credentials) applied
    /// to every tile fetch.
    pub fn env(mut self, env: RequestEnv) -> Self {
        self.env = env;
        self
    }

    pub fn build(self) -> TilePipeline {
        let context = self.context.unwrap_or_else(HttpContext::global);
        TilePipeline {
            template: self.template,
            profile: self.profile,
            clients: ClientPool::new(context),
            env: self.env,
            image_gate: Keygate::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_construction() {
        let pipeline = TilePipeline::builder("http://tiles.example.com/{z}/{x}/{y}.png")
            .profile(Profile::WebMercator)
            .build();
        let key = TileKey::new(14, 1000, 2000, Profile::WebMercator);
        let request = pipeline.request_for(&key);
        assert_eq!(request.full_url(), "http://tiles.example.com/14/1000/2000.png");
    }

    #[test]
    fn test_builder_defaults() {
        let pipeline = TilePipeline::builder("http://ex/{z}/{x}/{-y}.png").build();
        assert_eq!(pipeline.profile(), Profile::WebMercator);
        assert!(pipeline.template().has_placeholders());
        assert_eq!(pipeline.stats().total_requests, 0);
    }
}
