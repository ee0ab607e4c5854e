//! Shared fixtures: an exposed repository served over real HTTP
//!
//! [`FixtureServer`] binds an axum router on `127.0.0.1:0` and serves an
//! in-memory `.git` directory: an index built with [`gitrip::index::encode`]
//! and one zlib-compressed loose object per file. Routes can be broken,
//! removed or slowed down per test.

#![allow(dead_code)]

use axum::{
    extract::State,
    http::{StatusCode, Uri},
    serve, Router,
};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use gitrip::retriever::object_path;
use gitrip::{index, ObjectId};
use parking_lot::Mutex;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Encode `content` as a loose blob, returning its id and compressed payload
pub fn loose_object(content: &[u8]) -> (ObjectId, Vec<u8>) {
    let mut object = format!("blob {}\0", content.len()).into_bytes();
    object.extend_from_slice(content);
    let id = ObjectId::from_slice(&Sha1::digest(&object)).unwrap();

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&object).unwrap();
    (id, encoder.finish().unwrap())
}

#[derive(Default)]
struct ServerState {
    routes: Mutex<HashMap<String, (StatusCode, Vec<u8>)>>,
    requests: Mutex<Vec<String>>,
    delay: Mutex<Duration>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

async fn serve_route(State(state): State<Arc<ServerState>>, uri: Uri) -> (StatusCode, Vec<u8>) {
    let path = uri.path().to_string();
    state.requests.lock().push(path.clone());

    let active = state.active.fetch_add(1, Ordering::SeqCst) + 1;
    state.peak.fetch_max(active, Ordering::SeqCst);
    let delay = *state.delay.lock();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    state.active.fetch_sub(1, Ordering::SeqCst);

    state
        .routes
        .lock()
        .get(&path)
        .cloned()
        .unwrap_or((StatusCode::NOT_FOUND, b"not found".to_vec()))
}

/// Fake web server exposing one repository under `/.git`
pub struct FixtureServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    ids: Vec<ObjectId>,
}

impl FixtureServer {
    /// Serve `files` (path, content) as an exposed repository, in that index order
    pub async fn spawn(files: &[(&str, &[u8])]) -> Self {
        let state = Arc::new(ServerState::default());
        let mut listing = Vec::new();
        let mut ids = Vec::new();
        {
            let mut routes = state.routes.lock();
            for (path, content) in files {
                let (id, payload) = loose_object(content);
                routes.insert(format!("/.git/{}", object_path(&id)), (StatusCode::OK, payload));
                listing.push((id, *path));
                ids.push(id);
            }
            routes.insert(
                "/.git/index".to_string(),
                (StatusCode::OK, index::encode(&listing)),
            );
        }

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = Router::new()
            .fallback(serve_route)
            .with_state(Arc::clone(&state));

        let server = serve(listener, router);
        tokio::spawn(async move {
            let _ = server.await;
        });

        Self { addr, state, ids }
    }

    /// Target URL to hand to the scraper
    pub fn target(&self) -> String {
        format!("http://{}/.git", self.addr)
    }

    /// Host directory the scraper writes into
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    /// Id of the `n`th file
    pub fn id(&self, n: usize) -> ObjectId {
        self.ids[n]
    }

    /// Route serving the `n`th file's object
    pub fn object_route(&self, n: usize) -> String {
        format!("/.git/{}", object_path(&self.ids[n]))
    }

    /// Answer `route` with `status` and an empty body
    pub fn set_status(&self, route: &str, status: StatusCode) {
        self.state
            .routes
            .lock()
            .insert(route.to_string(), (status, Vec::new()));
    }

    /// Answer `route` with arbitrary bytes
    pub fn set_body(&self, route: &str, body: Vec<u8>) {
        self.state
            .routes
            .lock()
            .insert(route.to_string(), (StatusCode::OK, body));
    }

    /// Body currently served at `route`
    pub fn body(&self, route: &str) -> Vec<u8> {
        self.state.routes.lock()[route].1.clone()
    }

    /// Delay every response
    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock() = delay;
    }

    /// Paths requested so far
    pub fn requests(&self) -> Vec<String> {
        self.state.requests.lock().clone()
    }

    /// Highest number of requests handled at the same time
    pub fn peak_concurrency(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }
}
