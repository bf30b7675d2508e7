//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::{http::StatusCode, routing::post, Router};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use docpipe::adapters::{ErpSubmitter, SubmitRequest};

pub const SOAP_OK: &str = r#"<soapenv:Envelope><soapenv:Body><runResponse><status>1</status></runResponse></soapenv:Body></soapenv:Envelope>"#;
pub const SOAP_FAULT: &str = r#"<soapenv:Envelope><soapenv:Body><soapenv:Fault><faultcode>soapenv:Server</faultcode><faultstring>Template KLAES locked</faultstring></soapenv:Fault></soapenv:Body></soapenv:Envelope>"#;

/// Serve `app` on an ephemeral loopback port
pub async fn spawn_app(app: Router) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, handle)
}

/// A fake ERP SOAP endpoint answering with a fixed status and body.
pub struct MockErp {
    pub url: String,
    hits: Arc<AtomicUsize>,
    last_request: Arc<Mutex<Option<(Option<String>, String)>>>,
    _handle: JoinHandle<()>,
}

impl MockErp {
    pub async fn start(status: StatusCode, body: &'static str) -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let last_request = Arc::new(Mutex::new(None));

        let (hits_in, last_in) = (hits.clone(), last_request.clone());
        let app = Router::new().route(
            "/soap",
            post(move |headers: axum::http::HeaderMap, payload: String| {
                let hits = hits_in.clone();
                let last = last_in.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    let auth = headers
                        .get(axum::http::header::AUTHORIZATION)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    *last.lock().unwrap() = Some((auth, payload));
                    (status, body)
                }
            }),
        );

        let (addr, handle) = spawn_app(app).await;
        Self {
            url: format!("http://{}/soap", addr),
            hits,
            last_request,
            _handle: handle,
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Authorization header and body of the most recent call
    pub fn last_request(&self) -> Option<(Option<String>, String)> {
        self.last_request.lock().unwrap().clone()
    }

    pub fn submitter(&self) -> ErpSubmitter {
        ErpSubmitter::new(
            Some(self.url.clone()),
            "admin",
            "pw",
            std::time::Duration::from_secs(5),
            false,
        )
        .unwrap()
    }
}

pub fn submit_request() -> SubmitRequest {
    SubmitRequest {
        template: "KLAES".to_string(),
        pool_alias: "PRODUCTION".to_string(),
        language: "SPA".to_string(),
    }
}

/// Three ordered search roots plus import and output folders in a temp dir
pub struct Fixture {
    pub temp: TempDir,
    pub roots: Vec<PathBuf>,
    pub import_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let roots: Vec<PathBuf> = ["errors", "urgent", "pending"]
            .iter()
            .map(|name| {
                let dir = temp.path().join(name);
                std::fs::create_dir_all(&dir).unwrap();
                dir
            })
            .collect();
        let import_dir = temp.path().join("import");
        let output_dir = temp.path().join("output");

        Self {
            temp,
            roots,
            import_dir,
            output_dir,
        }
    }

    /// Place `<code>.xml` in root `index` (1-based)
    pub fn place(&self, index: usize, code: &str, content: &str) -> PathBuf {
        let path = self.roots[index - 1].join(format!("{}.xml", code));
        std::fs::write(&path, content).unwrap();
        path
    }
}
