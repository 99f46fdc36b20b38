//! Shared test support: an in-memory browser driver that simulates the
//! Invoice Parser application's auth behavior, and a stub HTTP responder for
//! the suite reachability probe.

// Not every test binary uses every helper here
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;

use invparser_e2e::{BrowserDriver, BrowserPage, BrowserSession, HarnessError, HarnessResult};

/// Observable driver-side counters and switches.
#[derive(Default)]
pub struct MockState {
    /// Completed login sequences
    pub logins: AtomicUsize,
    /// Sessions opened (any kind)
    pub sessions_opened: AtomicUsize,
    /// When false, submitting the login form never redirects to the dashboard
    pub accept_credentials: AtomicBool,
    /// When true, authenticated routes redirect to /login despite a seeded
    /// session (simulates an expired artifact)
    pub force_stale: AtomicBool,
    /// Artificial delay inside the login sequence, to widen race windows
    pub login_delay_ms: AtomicUsize,
    /// Pages currently open across every session of this driver
    pub open_pages: AtomicUsize,
    /// Pages released through an explicit close (dropping a page without
    /// closing it does not count)
    pub pages_closed: AtomicUsize,
}

pub struct MockDriver {
    state: Arc<MockState>,
}

impl MockDriver {
    pub fn new() -> Self {
        let state = Arc::new(MockState::default());
        state.accept_credentials.store(true, Ordering::SeqCst);
        Self { state }
    }

    pub fn state(&self) -> Arc<MockState> {
        Arc::clone(&self.state)
    }

    pub fn logins(&self) -> usize {
        self.state.logins.load(Ordering::SeqCst)
    }

    pub fn sessions_opened(&self) -> usize {
        self.state.sessions_opened.load(Ordering::SeqCst)
    }

    pub fn open_pages(&self) -> usize {
        self.state.open_pages.load(Ordering::SeqCst)
    }

    pub fn pages_closed(&self) -> usize {
        self.state.pages_closed.load(Ordering::SeqCst)
    }
}

struct MockSessionState {
    logged_in: AtomicBool,
    driver: Arc<MockState>,
}

pub struct MockSession {
    state: Arc<MockSessionState>,
}

#[async_trait]
impl BrowserDriver for MockDriver {
    async fn open_session(
        &self,
        storage_state: Option<&Path>,
    ) -> HarnessResult<Box<dyn BrowserSession>> {
        self.state.sessions_opened.fetch_add(1, Ordering::SeqCst);

        // A session seeded from a structurally valid artifact starts
        // authenticated, mirroring newContext({ storageState })
        let logged_in = match storage_state {
            Some(path) => {
                let bytes = std::fs::read(path).map_err(HarnessError::Io)?;
                let value: Value = serde_json::from_slice(&bytes)
                    .map_err(|e| HarnessError::Driver(format!("bad storage state: {e}")))?;
                value.get("cookies").map(Value::is_array).unwrap_or(false)
            }
            None => false,
        };

        Ok(Box::new(MockSession {
            state: Arc::new(MockSessionState {
                logged_in: AtomicBool::new(logged_in),
                driver: Arc::clone(&self.state),
            }),
        }))
    }
}

#[async_trait]
impl BrowserSession for MockSession {
    async fn new_page(&self, init_script: Option<&str>) -> HarnessResult<Box<dyn BrowserPage>> {
        self.state.driver.open_pages.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockPage {
            session: Arc::clone(&self.state),
            url: Mutex::new(String::new()),
            fields: Mutex::new(HashMap::new()),
            init_script: init_script.map(String::from),
            closed: AtomicBool::new(false),
        }))
    }

    async fn storage_state(&self) -> HarnessResult<Value> {
        if self.state.logged_in.load(Ordering::SeqCst) {
            Ok(json!({
                "cookies": [{ "name": "session", "value": "mock-session" }],
                "origins": [{
                    "origin": "http://app.test",
                    "localStorage": [{ "name": "auth_token", "value": "true" }]
                }]
            }))
        } else {
            Ok(json!({ "cookies": [], "origins": [] }))
        }
    }

    async fn close(&mut self) -> HarnessResult<()> {
        Ok(())
    }
}

pub struct MockPage {
    session: Arc<MockSessionState>,
    url: Mutex<String>,
    /// Page-local mutable state: filled form fields
    fields: Mutex<HashMap<String, String>>,
    #[allow(dead_code)]
    init_script: Option<String>,
    closed: AtomicBool,
}

#[async_trait]
impl BrowserPage for MockPage {
    async fn goto(&self, url: &str, _timeout: Duration) -> HarnessResult<()> {
        let authenticated_route = !url.contains("/login");
        let usable = self.session.logged_in.load(Ordering::SeqCst)
            && !self.session.driver.force_stale.load(Ordering::SeqCst);

        let landed = if authenticated_route && !usable {
            // The app's ProtectedRoute kicks unauthenticated visitors out
            let base = url.splitn(4, '/').take(3).collect::<Vec<_>>().join("/");
            format!("{base}/login")
        } else {
            url.to_string()
        };
        *self.url.lock().await = landed;
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> HarnessResult<()> {
        self.fields
            .lock()
            .await
            .insert(selector.to_string(), value.to_string());
        Ok(())
    }

    async fn click(&self, selector: &str) -> HarnessResult<()> {
        if !selector.contains("Sign In") {
            return Ok(());
        }

        // Login form submitted
        let delay = self.session.driver.login_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }

        let fields = self.fields.lock().await;
        let creds_ok = fields.values().filter(|v| v.as_str() == "admin").count() >= 2;
        let accepted = creds_ok && self.session.driver.accept_credentials.load(Ordering::SeqCst);
        drop(fields);

        if accepted {
            self.session.logged_in.store(true, Ordering::SeqCst);
            self.session.driver.logins.fetch_add(1, Ordering::SeqCst);

            let mut url = self.url.lock().await;
            let base = url.splitn(4, '/').take(3).collect::<Vec<_>>().join("/");
            *url = format!("{base}/dashboard");
        }
        Ok(())
    }

    async fn wait_for_url(&self, glob: &str, timeout: Duration) -> HarnessResult<()> {
        let suffix = glob.trim_start_matches("**");
        if self.url.lock().await.ends_with(suffix) {
            Ok(())
        } else {
            Err(HarnessError::NavigationTimeout {
                condition: format!("url matching {glob}"),
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    }

    async fn wait_for_network_idle(&self, _timeout: Duration) -> HarnessResult<()> {
        Ok(())
    }

    async fn current_url(&self) -> HarnessResult<String> {
        Ok(self.url.lock().await.clone())
    }

    async fn title(&self) -> HarnessResult<String> {
        Ok("Invoice Parser".to_string())
    }

    async fn is_visible(&self, selector: &str) -> HarnessResult<bool> {
        Ok(self.fields.lock().await.contains_key(selector))
    }

    async fn inner_text(&self, selector: &str) -> HarnessResult<String> {
        Ok(self
            .fields
            .lock()
            .await
            .get(selector)
            .cloned()
            .unwrap_or_default())
    }

    async fn close(&mut self) -> HarnessResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.session.driver.open_pages.fetch_sub(1, Ordering::SeqCst);
            self.session.driver.pages_closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for MockPage {
    fn drop(&mut self) {
        // A page dropped without close() leaked; keep the counter honest
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.session.driver.open_pages.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Harness configuration with short timeouts, rooted in a scratch directory.
pub fn test_config(dir: &Path) -> invparser_e2e::HarnessConfig {
    invparser_e2e::HarnessConfig {
        base_url: "http://app.test".to_string(),
        auth_state_path: dir.join("auth_state.json"),
        navigation_timeout: Duration::from_secs(2),
        login_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

/// Minimal HTTP responder so the suite reachability probe succeeds.
/// Returns the base URL; the listener task lives until the test ends.
pub async fn spawn_stub_app() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub app");
    let addr = listener.local_addr().expect("stub app addr");

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                    .await;
            });
        }
    });

    format!("http://{addr}")
}

/// Logging init shared by the integration tests.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
