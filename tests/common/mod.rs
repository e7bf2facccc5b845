//! Shared test helpers: a scripted wire transport installed through
//! the backend factory, plus canned responses.
#![allow(dead_code)]

use bytes::Bytes;
use earthtile::http::{
    Headers, HttpContext, HttpRequest, HttpResponse, Part, RequestEnv, Transport,
    TransportFactory,
};
use earthtile::progress::Progress;
use earthtile::uri::TransportHandle;
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared script driving every transport handle the factory creates.
#[derive(Default)]
pub struct Script {
    responses: Mutex<VecDeque<HttpResponse>>,
    calls: AtomicUsize,
    /// Sleep before answering, to widen concurrency windows.
    pub delay: Mutex<Duration>,
}

impl Script {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues the next response; the queue drains one per GET.
    pub fn push(&self, response: HttpResponse) {
        self.responses
            .lock()
            .unwrap()
            .push_back(response);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Number of GETs that reached the wire.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub struct ScriptedTransport {
    script: Arc<Script>,
    handle: TransportHandle,
}

impl Transport for ScriptedTransport {
    fn do_get<'a>(
        &'a mut self,
        _request: &'a HttpRequest,
        _env: &'a RequestEnv,
        progress: Option<&'a dyn Progress>,
    ) -> BoxFuture<'a, HttpResponse> {
        Box::pin(async move {
            self.script.calls.fetch_add(1, Ordering::SeqCst);

            let delay = *self.script.delay.lock().unwrap();
            if delay > Duration::ZERO {
                tokio::time::sleep(delay).await;
            }

            let response = self
                .script
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| HttpResponse::new(404));

            // poll the progress observer the way a streaming backend
            // would between chunks
            if let Some(p) = progress {
                let total = response.part(0).map(|part| part.size() as u64).unwrap_or(0);
                if p.report_progress(total.min(1), total) || p.is_canceled() {
                    return HttpResponse::canceled("transfer canceled by progress callback", false);
                }
            }

            response
        })
    }

    fn set_user_agent(&mut self, _agent: &str) {}

    fn set_timeout(&mut self, _timeout: Duration) {}

    fn set_connect_timeout(&mut self, _timeout: Duration) {}

    fn handle(&self) -> TransportHandle {
        self.handle
    }
}

pub struct ScriptedFactory {
    pub script: Arc<Script>,
    next_handle: AtomicUsize,
}

impl ScriptedFactory {
    pub fn new(script: Arc<Script>) -> Arc<Self> {
        Arc::new(Self {
            script,
            next_handle: AtomicUsize::new(1),
        })
    }
}

impl TransportFactory for ScriptedFactory {
    fn create(&self, _context: Arc<HttpContext>) -> Box<dyn Transport> {
        Box::new(ScriptedTransport {
            script: self.script.clone(),
            handle: TransportHandle(self.next_handle.fetch_add(1, Ordering::SeqCst) as u64),
        })
    }
}

/// A context wired to a fresh script. Returns (context, script).
pub fn scripted_context() -> (Arc<HttpContext>, Arc<Script>) {
    let script = Script::new();
    let context = Arc::new(HttpContext::new());
    context.set_transport_factory(ScriptedFactory::new(script.clone()));
    (context, script)
}

/// Real encoded PNG bytes (a small solid-color tile).
pub fn png_bytes() -> Vec<u8> {
    let image = image::DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
        4,
        4,
        image::Rgba([0, 128, 255, 255]),
    ));
    let mut out = std::io::Cursor::new(Vec::new());
    image.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

/// 200 response carrying a PNG body and the given extra headers.
pub fn png_response(extra_headers: &[(&str, &str)]) -> HttpResponse {
    let mut headers = Headers::new();
    headers.set("content-type", "image/png");
    for (name, value) in extra_headers {
        headers.set(name, *value);
    }
    let mut response = HttpResponse::new(200);
    response.set_mime_type("image/png");
    response
        .parts_mut()
        .push(Part::new(headers, Bytes::from(png_bytes())));
    response
}

/// 200 response carrying a text body.
pub fn text_response(body: &str) -> HttpResponse {
    let mut headers = Headers::new();
    headers.set("content-type", "text/plain");
    let mut response = HttpResponse::new(200);
    response.set_mime_type("text/plain");
    response
        .parts_mut()
        .push(Part::new(headers, Bytes::from(body.as_bytes().to_vec())));
    response
}
