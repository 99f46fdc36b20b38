//! Error types for the E2E harness

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Login failed: {0}")]
    LoginFailure(String),

    #[error("Could not persist auth state: {0}")]
    PersistFailure(String),

    #[error("Cached auth state is stale: {0}")]
    StaleArtifact(String),

    #[error("Timeout after {timeout_ms} ms waiting for: {condition}")]
    NavigationTimeout { condition: String, timeout_ms: u64 },

    #[error("Application not reachable at {url}: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("Playwright not found. Install with: npm install playwright")]
    PlaywrightNotFound,

    #[error("Browser driver error: {0}")]
    Driver(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl HarnessError {
    /// True for failures that must abort the whole suite rather than a
    /// single test (no tests can run without an authenticated session).
    pub fn is_fatal_to_suite(&self) -> bool {
        matches!(
            self,
            HarnessError::LoginFailure(_)
                | HarnessError::PersistFailure(_)
                | HarnessError::Unreachable { .. }
                | HarnessError::PlaywrightNotFound
        )
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;
