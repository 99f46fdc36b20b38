//! Browser driver capability traits
//!
//! The harness consumes the browser through these three seams and takes no
//! position on what backs them. [`crate::playwright::PlaywrightDriver`] is the
//! production implementation; tests substitute an in-memory mock.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::HarnessResult;

/// Opens authenticated or blank browser sessions.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Open a new isolated session (browser context). When `storage_state`
    /// names a persisted auth artifact, the session starts authenticated.
    async fn open_session(
        &self,
        storage_state: Option<&Path>,
    ) -> HarnessResult<Box<dyn BrowserSession>>;
}

/// One live browser context: cookies and storage shared by its pages.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Open a fresh page in this context. `init_script` runs before any
    /// document script on every navigation of the new page.
    async fn new_page(&self, init_script: Option<&str>) -> HarnessResult<Box<dyn BrowserPage>>;

    /// Serialize this context's cookies and local storage.
    async fn storage_state(&self) -> HarnessResult<serde_json::Value>;

    /// Close the context and every page it owns.
    async fn close(&mut self) -> HarnessResult<()>;
}

/// One page (tab) inside a session.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn goto(&self, url: &str, timeout: Duration) -> HarnessResult<()>;

    async fn fill(&self, selector: &str, value: &str) -> HarnessResult<()>;

    async fn click(&self, selector: &str) -> HarnessResult<()>;

    /// Block until the page URL matches `glob` (Playwright glob syntax).
    async fn wait_for_url(&self, glob: &str, timeout: Duration) -> HarnessResult<()>;

    /// Block until no network connections have been open for ~500 ms.
    async fn wait_for_network_idle(&self, timeout: Duration) -> HarnessResult<()>;

    async fn current_url(&self) -> HarnessResult<String>;

    async fn title(&self) -> HarnessResult<String>;

    async fn is_visible(&self, selector: &str) -> HarnessResult<bool>;

    async fn inner_text(&self, selector: &str) -> HarnessResult<String>;

    async fn close(&mut self) -> HarnessResult<()>;
}
