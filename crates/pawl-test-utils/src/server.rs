//! Cloud-Storage-shaped HTTP emulator.
//!
//! Serves the object subset of the GCS XML API that the lock adapter
//! uses: conditional PUT (including `?compose`), conditional DELETE, and
//! GET/HEAD with `x-goog-generation`, `x-goog-meta-ttl`, `Last-Modified`
//! and `Date` headers.
//!
//! Tests drive time by advancing the emulator's clock rather than
//! sleeping: expiration is judged client-side from the `Date` header, so
//! a clock jump expires locks instantly. Fault injection fails the next
//! N requests with a chosen status, and request counters let tests
//! assert on write traffic.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use bytes::Bytes;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::oneshot;

const GENERATION_HEADER: &str = "x-goog-generation";
const IF_GENERATION_MATCH_HEADER: &str = "x-goog-if-generation-match";
const META_TTL_HEADER: &str = "x-goog-meta-ttl";

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    generation: u64,
    ttl: String,
    last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct Fault {
    status: u16,
    remaining: usize,
}

#[derive(Debug, Default)]
struct ServerState {
    buckets: Mutex<HashMap<String, HashMap<String, StoredObject>>>,
    next_generation: AtomicU64,
    clock_offset_ms: AtomicI64,
    fault: Mutex<Option<Fault>>,
    puts: AtomicU64,
    deletes: AtomicU64,
    reads: AtomicU64,
}

impl ServerState {
    fn now(&self) -> DateTime<Utc> {
        Utc::now() + ChronoDuration::milliseconds(self.clock_offset_ms.load(Ordering::SeqCst))
    }

    fn take_fault(&self) -> Option<u16> {
        let mut slot = self.fault.lock().expect("fault lock");
        let fault = slot.as_mut()?;
        if fault.remaining == 0 {
            *slot = None;
            return None;
        }
        fault.remaining -= 1;
        let status = fault.status;
        if fault.remaining == 0 {
            *slot = None;
        }
        Some(status)
    }

    fn fresh_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// An in-process object store speaking the lock adapter's wire protocol.
pub struct FakeGcs {
    base_url: String,
    state: Arc<ServerState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    _task: tokio::task::JoinHandle<()>,
}

impl std::fmt::Debug for FakeGcs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeGcs")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl FakeGcs {
    /// Binds an emulator to `127.0.0.1:0` and starts serving.
    ///
    /// # Panics
    ///
    /// Panics if the listener cannot be bound.
    pub async fn start() -> Self {
        let state = Arc::new(ServerState::default());

        let app = Router::new()
            .route("/:bucket/*object", any(handle))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind emulator listener");
        let addr: SocketAddr = listener.local_addr().expect("emulator local addr");
        let base_url = format!("http://{addr}");

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = server.await;
        });

        Self {
            base_url,
            state,
            shutdown_tx: Some(shutdown_tx),
            _task: task,
        }
    }

    /// Endpoint URL to hand to the lock configuration.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.base_url
    }

    /// Creates a bucket. Writes to unknown buckets return 404.
    pub fn create_bucket(&self, name: impl Into<String>) {
        self.state
            .buckets
            .lock()
            .expect("buckets lock")
            .entry(name.into())
            .or_default();
    }

    /// Advances the emulator's clock. Only the `Date` and expiry
    /// arithmetic move; stored objects keep their `Last-Modified`.
    pub fn advance_clock(&self, by: std::time::Duration) {
        let ms = i64::try_from(by.as_millis()).expect("offset fits i64");
        self.state.clock_offset_ms.fetch_add(ms, Ordering::SeqCst);
        tracing::debug!(ms, "emulator clock advanced");
    }

    /// Fails the next `count` requests (any method) with `status`.
    pub fn fail_requests(&self, status: u16, count: usize) {
        *self.state.fault.lock().expect("fault lock") = Some(Fault {
            status,
            remaining: count,
        });
    }

    /// Number of conditional writes served (PUT, including compose).
    #[must_use]
    pub fn put_count(&self) -> u64 {
        self.state.puts.load(Ordering::SeqCst)
    }

    /// Number of conditional deletes served.
    #[must_use]
    pub fn delete_count(&self) -> u64 {
        self.state.deletes.load(Ordering::SeqCst)
    }

    /// Number of GET/HEAD requests served.
    #[must_use]
    pub fn read_count(&self) -> u64 {
        self.state.reads.load(Ordering::SeqCst)
    }

    /// Returns true if the object currently exists.
    #[must_use]
    pub fn object_exists(&self, bucket: &str, object: &str) -> bool {
        self.generation(bucket, object).is_some()
    }

    /// Current generation of the object, if it exists.
    #[must_use]
    pub fn generation(&self, bucket: &str, object: &str) -> Option<u64> {
        self.state
            .buckets
            .lock()
            .expect("buckets lock")
            .get(bucket)?
            .get(object)
            .map(|o| o.generation)
    }

    /// Current payload of the object, if it exists.
    #[must_use]
    pub fn object_data(&self, bucket: &str, object: &str) -> Option<Bytes> {
        self.state
            .buckets
            .lock()
            .expect("buckets lock")
            .get(bucket)?
            .get(object)
            .map(|o| o.data.clone())
    }
}

impl Drop for FakeGcs {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn handle(
    State(state): State<Arc<ServerState>>,
    Path((bucket, object)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(status) = state.take_fault() {
        tracing::debug!(%method, status, "failing request with injected fault");
        return respond(&state, status, HeaderMap::new(), Bytes::new());
    }
    tracing::trace!(%method, %bucket, %object, "serving request");

    if method == Method::PUT && query.as_deref() == Some("compose") {
        state.puts.fetch_add(1, Ordering::SeqCst);
        compose_object(&state, &bucket, &object, &headers)
    } else if method == Method::PUT {
        state.puts.fetch_add(1, Ordering::SeqCst);
        put_object(&state, &bucket, &object, &headers, body)
    } else if method == Method::DELETE {
        state.deletes.fetch_add(1, Ordering::SeqCst);
        delete_object(&state, &bucket, &object, &headers)
    } else if method == Method::GET || method == Method::HEAD {
        state.reads.fetch_add(1, Ordering::SeqCst);
        read_object(&state, &bucket, &object, method == Method::HEAD)
    } else {
        respond(&state, 405, HeaderMap::new(), Bytes::new())
    }
}

fn put_object(
    state: &ServerState,
    bucket: &str,
    object: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Response {
    let Some(expected) = header_str(headers, IF_GENERATION_MATCH_HEADER) else {
        return respond(state, 400, HeaderMap::new(), Bytes::new());
    };

    let generation = state.fresh_generation();
    let now = state.now();
    let ttl = header_str(headers, META_TTL_HEADER).unwrap_or("0").to_string();

    let mut buckets = state.buckets.lock().expect("buckets lock");
    let Some(objects) = buckets.get_mut(bucket) else {
        return respond(state, 404, HeaderMap::new(), Bytes::new());
    };

    let matches = match objects.get(object) {
        None => expected == "0",
        Some(current) => expected == current.generation.to_string(),
    };
    if !matches {
        return respond(state, 412, HeaderMap::new(), Bytes::new());
    }

    objects.insert(
        object.to_string(),
        StoredObject {
            data: body,
            generation,
            ttl,
            last_modified: now,
        },
    );
    drop(buckets);

    respond(state, 200, generation_headers(generation), Bytes::new())
}

fn compose_object(
    state: &ServerState,
    bucket: &str,
    object: &str,
    headers: &HeaderMap,
) -> Response {
    let Some(expected) = header_str(headers, IF_GENERATION_MATCH_HEADER) else {
        return respond(state, 400, HeaderMap::new(), Bytes::new());
    };

    let generation = state.fresh_generation();
    let now = state.now();
    let ttl = header_str(headers, META_TTL_HEADER).unwrap_or("0").to_string();

    let mut buckets = state.buckets.lock().expect("buckets lock");
    let Some(objects) = buckets.get_mut(bucket) else {
        return respond(state, 404, HeaderMap::new(), Bytes::new());
    };
    let Some(current) = objects.get_mut(object) else {
        return respond(state, 404, HeaderMap::new(), Bytes::new());
    };

    if expected != current.generation.to_string() {
        return respond(state, 412, HeaderMap::new(), Bytes::new());
    }

    current.generation = generation;
    current.last_modified = now;
    current.ttl = ttl;
    drop(buckets);

    respond(state, 200, generation_headers(generation), Bytes::new())
}

fn delete_object(
    state: &ServerState,
    bucket: &str,
    object: &str,
    headers: &HeaderMap,
) -> Response {
    let Some(expected) = header_str(headers, IF_GENERATION_MATCH_HEADER) else {
        return respond(state, 400, HeaderMap::new(), Bytes::new());
    };

    let mut buckets = state.buckets.lock().expect("buckets lock");
    let Some(objects) = buckets.get_mut(bucket) else {
        return respond(state, 404, HeaderMap::new(), Bytes::new());
    };
    let Some(current) = objects.get(object) else {
        return respond(state, 404, HeaderMap::new(), Bytes::new());
    };

    if expected != current.generation.to_string() {
        return respond(state, 412, HeaderMap::new(), Bytes::new());
    }

    objects.remove(object);
    drop(buckets);

    respond(state, 204, HeaderMap::new(), Bytes::new())
}

fn read_object(state: &ServerState, bucket: &str, object: &str, head: bool) -> Response {
    let buckets = state.buckets.lock().expect("buckets lock");
    let Some(stored) = buckets.get(bucket).and_then(|objects| objects.get(object)) else {
        return respond(state, 404, HeaderMap::new(), Bytes::new());
    };

    let mut headers = generation_headers(stored.generation);
    insert_header(&mut headers, META_TTL_HEADER, &stored.ttl);
    insert_header(
        &mut headers,
        "last-modified",
        &http_date(stored.last_modified),
    );
    let body = if head { Bytes::new() } else { stored.data.clone() };
    let response = respond(state, 200, headers, body);
    drop(buckets);
    response
}

fn respond(state: &ServerState, status: u16, mut headers: HeaderMap, body: Bytes) -> Response {
    insert_header(&mut headers, "date", &http_date(state.now()));
    (
        StatusCode::from_u16(status).expect("valid status"),
        headers,
        Body::from(body),
    )
        .into_response()
}

fn generation_headers(generation: u64) -> HeaderMap {
    let mut headers = HeaderMap::new();
    insert_header(&mut headers, GENERATION_HEADER, &generation.to_string());
    headers
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    headers.insert(
        name,
        HeaderValue::from_str(value).unwrap_or(HeaderValue::from_static("")),
    );
}

fn header_str<'a>(headers: &'a HeaderMap, name: &'static str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok()
}

fn http_date(ts: DateTime<Utc>) -> String {
    ts.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
