//! Suite lifecycle built on top of the session cache
//!
//! One [`Suite`] owns one authenticated browser session for its whole
//! lifetime. Each test gets a fresh [`ExecutionUnit`] (a new page in that
//! session) through [`Suite::run_test`], which closes the unit unconditionally
//! so a failing test body cannot leak pages into its siblings.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::config::HarnessConfig;
use crate::driver::{BrowserDriver, BrowserPage, BrowserSession};
use crate::error::{HarnessError, HarnessResult};
use crate::session_cache::SessionCache;

/// A test-class-level harness: one shared authenticated session, one
/// execution unit per test.
pub struct Suite {
    name: String,
    session: Box<dyn BrowserSession>,
    cache: Arc<SessionCache>,
    config: Arc<HarnessConfig>,
}

impl std::fmt::Debug for Suite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Suite")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Suite {
    /// Suite setup: probe the application, ensure the auth artifact, open the
    /// shared session. Any failure here is fatal to the whole suite.
    pub async fn start(
        name: &str,
        driver: &dyn BrowserDriver,
        cache: Arc<SessionCache>,
        config: HarnessConfig,
    ) -> HarnessResult<Self> {
        let config = Arc::new(config);

        match Self::open_shared_session(name, driver, &cache, &config).await {
            Ok(session) => Ok(Self {
                name: name.to_string(),
                session,
                cache,
                config,
            }),
            Err(e) => {
                // Distinguish fatal setup failures (login, persist, unreachable
                // application) from ordinary test failures in the output
                error!(
                    suite = name,
                    fatal = e.is_fatal_to_suite(),
                    "Suite setup failed: {}",
                    e
                );
                Err(e)
            }
        }
    }

    async fn open_shared_session(
        name: &str,
        driver: &dyn BrowserDriver,
        cache: &SessionCache,
        config: &HarnessConfig,
    ) -> HarnessResult<Box<dyn BrowserSession>> {
        debug!(suite = name, "Probing {}", config.base_url);
        probe_reachable(config).await?;

        let artifact = cache.ensure(driver, config).await?;
        let session = driver.open_session(Some(artifact.path())).await?;

        info!(
            suite = name,
            "Suite ready (auth state from {})",
            artifact.path().display()
        );
        Ok(session)
    }

    /// Run one test body against a fresh execution unit.
    ///
    /// The unit is closed even when the body errs or panics (test assertions
    /// fail by panicking); a panic is re-raised after the release. A
    /// [`HarnessError::StaleArtifact`] result additionally invalidates the
    /// cached auth state so the next run performs a fresh login; the current
    /// test still fails.
    pub async fn run_test<T, F>(&self, test_name: &str, f: F) -> HarnessResult<T>
    where
        F: for<'a> FnOnce(
            &'a ExecutionUnit,
        ) -> Pin<Box<dyn Future<Output = HarnessResult<T>> + Send + 'a>>,
    {
        debug!(suite = %self.name, test = test_name, "Starting test");

        let mut unit = self.new_unit().await?;
        let outcome = AssertUnwindSafe(f(&unit)).catch_unwind().await;

        // Guaranteed release, regardless of the test outcome
        if let Err(e) = unit.close().await {
            warn!(test = test_name, "Could not close execution unit: {}", e);
        }

        let result = match outcome {
            Ok(result) => result,
            Err(panic) => {
                warn!(test = test_name, "Test body panicked; execution unit released");
                std::panic::resume_unwind(panic);
            }
        };

        match &result {
            Ok(_) => debug!(test = test_name, "Test passed"),
            Err(HarnessError::StaleArtifact(reason)) => {
                warn!(
                    test = test_name,
                    "Auth state is stale ({}); invalidating for the next run", reason
                );
                if let Err(e) = self.cache.invalidate() {
                    warn!("Could not invalidate auth state: {}", e);
                }
            }
            Err(e) => debug!(test = test_name, "Test failed: {}", e),
        }

        result
    }

    async fn new_unit(&self) -> HarnessResult<ExecutionUnit> {
        let page = self
            .session
            .new_page(self.config.init_script.as_deref())
            .await?;
        Ok(ExecutionUnit {
            page,
            config: Arc::clone(&self.config),
        })
    }

    /// Suite teardown. Closes the session; the auth artifact stays on disk
    /// for the next suite or run.
    pub async fn shutdown(mut self) -> HarnessResult<()> {
        info!(suite = %self.name, "Closing suite session");
        self.session.close().await
    }
}

/// One isolated per-test browsing context: a fresh page sharing the suite's
/// authenticated identity but none of its predecessors' page state.
pub struct ExecutionUnit {
    page: Box<dyn BrowserPage>,
    config: Arc<HarnessConfig>,
}

impl ExecutionUnit {
    /// Navigate to an application path and wait for the page to settle.
    pub async fn goto(&self, path: &str) -> HarnessResult<()> {
        let url = self.config.url(path);
        self.page.goto(&url, self.config.navigation_timeout).await?;
        self.page
            .wait_for_network_idle(self.config.navigation_timeout)
            .await
    }

    /// Navigate to a route that requires authentication. A redirect to the
    /// login route means the cached auth state no longer works.
    pub async fn goto_authenticated(&self, path: &str) -> HarnessResult<()> {
        self.goto(path).await?;
        let url = self.page.current_url().await?;
        if is_login_route(&url, &self.config.login.login_path) {
            return Err(HarnessError::StaleArtifact(format!(
                "navigating to {path} redirected to {url}"
            )));
        }
        Ok(())
    }

    pub async fn current_url(&self) -> HarnessResult<String> {
        self.page.current_url().await
    }

    pub async fn title(&self) -> HarnessResult<String> {
        self.page.title().await
    }

    pub async fn fill(&self, selector: &str, value: &str) -> HarnessResult<()> {
        self.page.fill(selector, value).await
    }

    pub async fn click(&self, selector: &str) -> HarnessResult<()> {
        self.page.click(selector).await
    }

    pub async fn is_visible(&self, selector: &str) -> HarnessResult<bool> {
        self.page.is_visible(selector).await
    }

    pub async fn inner_text(&self, selector: &str) -> HarnessResult<String> {
        self.page.inner_text(selector).await
    }

    pub async fn wait_for_network_idle(&self) -> HarnessResult<()> {
        self.page
            .wait_for_network_idle(self.config.navigation_timeout)
            .await
    }

    /// Raw page capability, for anything the helpers don't cover.
    pub fn page(&self) -> &dyn BrowserPage {
        self.page.as_ref()
    }

    async fn close(&mut self) -> HarnessResult<()> {
        self.page.close().await
    }
}

/// True when the landed URL's path is the login route (or a subpath of it).
/// Compares paths, not substrings: an authenticated URL that merely mentions
/// the login route in a query parameter or a longer segment does not count.
fn is_login_route(url: &str, login_path: &str) -> bool {
    let path = url_path(url);
    let login = login_path.trim_end_matches('/');
    path == login || path.starts_with(&format!("{login}/"))
}

/// Extract the path component of a URL, without query or fragment.
fn url_path(url: &str) -> &str {
    let after_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let path = match after_scheme.find('/') {
        Some(i) => &after_scheme[i..],
        None => "/",
    };
    let end = path.find(['?', '#']).unwrap_or(path.len());
    &path[..end]
}

/// Wait for the application to answer HTTP at all before attempting login.
async fn probe_reachable(config: &HarnessConfig) -> HarnessResult<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()?;

    let deadline = tokio::time::Instant::now() + config.navigation_timeout;
    let mut last_error = String::from("no attempt made");

    while tokio::time::Instant::now() < deadline {
        match client.get(&config.base_url).send().await {
            // Any HTTP response proves the server is up; the login flow deals
            // with status semantics
            Ok(_) => return Ok(()),
            Err(e) => {
                if e.is_connect() {
                    debug!("Waiting for {} to come up...", config.base_url);
                } else {
                    warn!("Reachability probe error: {}", e);
                }
                last_error = e.to_string();
            }
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    Err(HarnessError::Unreachable {
        url: config.base_url.clone(),
        reason: last_error,
    })
}
