//! Shared authenticated-session cache
//!
//! Every suite needs an authenticated browser context, but interactive login
//! is slow and suites may run concurrently as independent processes. The cache
//! persists one storage-state artifact (cookies + localStorage, Playwright
//! `storageState` shape) and guarantees:
//!
//! - a structurally valid artifact is reused with zero network logins
//! - concurrent initializers are collapsed into a single login (in-process via
//!   a mutex, cross-process best-effort via an exclusive lock file)
//! - the artifact is only ever replaced wholesale through a temp-file-and-
//!   rename, so readers never observe a partial write

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{HarnessConfig, LoginSpec};
use crate::driver::{BrowserDriver, BrowserPage, BrowserSession};
use crate::error::{HarnessError, HarnessResult};

/// The persisted proof of authentication.
#[derive(Debug, Clone)]
pub struct AuthArtifact {
    path: PathBuf,
    created_at: DateTime<Utc>,
    size: u64,
}

impl AuthArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Owns the lifecycle of the auth-state artifact.
pub struct SessionCache {
    path: PathBuf,
    lock_path: PathBuf,
    inflight: Mutex<()>,
    /// Artifacts older than this are treated as absent
    max_age: Option<Duration>,
    /// A lock file older than this belongs to a dead writer and is reclaimed
    lock_stale_after: Duration,
    /// How long a non-writer waits for the lock holder's artifact
    writer_wait: Duration,
    poll_interval: Duration,
}

impl SessionCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = path.with_extension("lock");
        Self {
            path,
            lock_path,
            inflight: Mutex::new(()),
            max_age: None,
            lock_stale_after: Duration::from_secs(120),
            writer_wait: Duration::from_secs(60),
            poll_interval: Duration::from_millis(200),
        }
    }

    /// Treat artifacts older than `max_age` as expired.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn artifact_path(&self) -> &Path {
        &self.path
    }

    /// Return a valid artifact, logging in at most once across all concurrent
    /// callers to produce it when absent.
    pub async fn ensure(
        &self,
        driver: &dyn BrowserDriver,
        config: &HarnessConfig,
    ) -> HarnessResult<AuthArtifact> {
        // Fast path: valid artifact on disk, no lock, no network
        if let Some(artifact) = self.load_valid() {
            debug!("Reusing auth state at {}", self.path.display());
            return Ok(artifact);
        }

        // In-process singleflight: first caller logs in, the rest block here
        // and find the artifact on re-check
        let _inflight = self.inflight.lock().await;
        if let Some(artifact) = self.load_valid() {
            debug!("Auth state created by a concurrent caller");
            return Ok(artifact);
        }

        // Cross-process de-duplication is best-effort: losing the race means
        // waiting for the winner's artifact, then falling back to an
        // idempotent login of our own if it never shows up
        match self.try_lock()? {
            Some(lock) => {
                let result = self.login_and_persist(driver, config).await;
                drop(lock);
                result
            }
            None => {
                info!("Another process is logging in; waiting for its auth state");
                if let Some(artifact) = self.wait_for_artifact().await {
                    return Ok(artifact);
                }
                warn!("Lock holder produced no auth state; logging in anyway");
                self.login_and_persist(driver, config).await
            }
        }
    }

    /// Discard the cached artifact. Idempotent; missing file is not an error.
    pub fn invalidate(&self) -> HarnessResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!("Invalidated auth state at {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HarnessError::Io(e)),
        }
    }

    /// Load the artifact if it exists, parses as storage state, and is fresh.
    fn load_valid(&self) -> Option<AuthArtifact> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Could not read auth state: {}", e);
                return None;
            }
        };

        if !is_valid_storage_state(&bytes) {
            warn!("Auth state at {} is not valid storage state", self.path.display());
            return None;
        }

        let meta = std::fs::metadata(&self.path).ok()?;
        let modified = meta.modified().ok()?;
        let created_at = DateTime::<Utc>::from(modified);

        if let Some(max_age) = self.max_age {
            let age = Utc::now().signed_duration_since(created_at);
            if age.to_std().map(|a| a > max_age).unwrap_or(false) {
                info!("Auth state is {} old; treating as expired", age);
                return None;
            }
        }

        Some(AuthArtifact {
            path: self.path.clone(),
            created_at,
            size: meta.len(),
        })
    }

    /// Best-effort exclusive writer lock via `create_new`. Returns `None`
    /// when another live writer holds it.
    fn try_lock(&self) -> HarnessResult<Option<WriterLock>> {
        for _ in 0..2 {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.lock_path)
            {
                Ok(file) => {
                    use std::io::Write;
                    let mut file = file;
                    let _ = write!(file, "{}", std::process::id());
                    return Ok(Some(WriterLock {
                        path: self.lock_path.clone(),
                    }));
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if self.lock_is_stale() {
                        warn!("Reclaiming stale writer lock at {}", self.lock_path.display());
                        let _ = std::fs::remove_file(&self.lock_path);
                        continue;
                    }
                    return Ok(None);
                }
                Err(e) => return Err(HarnessError::Io(e)),
            }
        }
        Ok(None)
    }

    fn lock_is_stale(&self) -> bool {
        std::fs::metadata(&self.lock_path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|m| m.elapsed().ok())
            .map(|age| age > self.lock_stale_after)
            .unwrap_or(false)
    }

    /// Poll for an artifact written by a concurrent process.
    async fn wait_for_artifact(&self) -> Option<AuthArtifact> {
        let deadline = tokio::time::Instant::now() + self.writer_wait;
        while tokio::time::Instant::now() < deadline {
            if let Some(artifact) = self.load_valid() {
                return Some(artifact);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
        None
    }

    /// The login sequence: fresh unauthenticated session, drive the login
    /// form, wait for the authenticated redirect, then atomically persist the
    /// resulting storage state.
    async fn login_and_persist(
        &self,
        driver: &dyn BrowserDriver,
        config: &HarnessConfig,
    ) -> HarnessResult<AuthArtifact> {
        info!("No usable auth state; performing interactive login");

        let mut session = driver.open_session(None).await?;
        let result = self.run_login(session.as_ref(), config).await;

        // The login session is throwaway; close it even when login failed
        if let Err(e) = session.close().await {
            warn!("Could not close login session: {}", e);
        }

        result
    }

    async fn run_login(
        &self,
        session: &dyn BrowserSession,
        config: &HarnessConfig,
    ) -> HarnessResult<AuthArtifact> {
        let login = &config.login;
        let mut page = session.new_page(None).await?;
        let result = self.drive_login_form(page.as_ref(), login, config).await;
        if let Err(e) = page.close().await {
            warn!("Could not close login page: {}", e);
        }
        result?;

        let state = session.storage_state().await?;
        let artifact = self.persist(&state)?;
        info!(
            "Auth state saved to {} ({} bytes)",
            artifact.path.display(),
            artifact.size
        );
        Ok(artifact)
    }

    async fn drive_login_form(
        &self,
        page: &dyn BrowserPage,
        login: &LoginSpec,
        config: &HarnessConfig,
    ) -> HarnessResult<()> {
        let login_url = config.url(&login.login_path);
        page.goto(&login_url, config.navigation_timeout).await?;
        if let Err(e) = page.wait_for_network_idle(config.navigation_timeout).await {
            debug!("Login page never settled: {}", e);
        }

        page.fill(&placeholder_selector(&login.username_placeholder), &login.username)
            .await?;
        page.fill(&placeholder_selector(&login.password_placeholder), &login.password)
            .await?;
        page.click(&button_selector(&login.submit_button)).await?;

        // The application signals success by redirecting to the dashboard
        match page.wait_for_url(&login.success_url_glob, config.login_timeout).await {
            Ok(()) => {}
            Err(HarnessError::NavigationTimeout { timeout_ms, .. }) => {
                return Err(HarnessError::LoginFailure(format!(
                    "no redirect to {} within {} ms (credentials rejected?)",
                    login.success_url_glob, timeout_ms
                )));
            }
            Err(e) => return Err(e),
        }

        if let Err(e) = page.wait_for_network_idle(config.navigation_timeout).await {
            debug!("Post-login page never settled: {}", e);
        }
        Ok(())
    }

    /// Write the artifact atomically: temp file in the target directory, fsync,
    /// rename over the destination.
    fn persist(&self, state: &Value) -> HarnessResult<AuthArtifact> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        let persist_err = |e: &dyn std::fmt::Display| {
            HarnessError::PersistFailure(format!("{}: {}", self.path.display(), e))
        };

        let bytes =
            serde_json::to_vec_pretty(state).map_err(|e| persist_err(&e))?;
        if !is_valid_storage_state(&bytes) {
            return Err(HarnessError::PersistFailure(format!(
                "{}: driver returned malformed storage state",
                self.path.display()
            )));
        }

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| persist_err(&e))?;
        {
            use std::io::Write;
            tmp.write_all(&bytes).map_err(|e| persist_err(&e))?;
        }
        tmp.as_file().sync_all().map_err(|e| persist_err(&e))?;
        tmp.persist(&self.path).map_err(|e| persist_err(&e))?;

        Ok(AuthArtifact {
            path: self.path.clone(),
            created_at: Utc::now(),
            size: bytes.len() as u64,
        })
    }
}

/// Removes the lock file when the writer is done (or fails).
struct WriterLock {
    path: PathBuf,
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Could not remove writer lock {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Structural validity: a JSON object with `cookies` and `origins` arrays,
/// the Playwright storage-state shape.
pub(crate) fn is_valid_storage_state(bytes: &[u8]) -> bool {
    let value: Value = match serde_json::from_slice(bytes) {
        Ok(v) => v,
        Err(_) => return false,
    };
    value.get("cookies").map(Value::is_array).unwrap_or(false)
        && value.get("origins").map(Value::is_array).unwrap_or(false)
}

fn placeholder_selector(placeholder: &str) -> String {
    format!("[placeholder=\"{placeholder}\"]")
}

fn button_selector(name: &str) -> String {
    format!("role=button[name=\"{name}\"]")
}
