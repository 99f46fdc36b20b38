//! Playwright browser automation
//!
//! Drives Playwright through a persistent `node` subprocess running a small
//! dispatcher script. Commands and replies are line-delimited JSON over the
//! child's stdio, so one browser context (and its pages) survives across the
//! whole suite instead of being rebuilt per step.

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command as TokioCommand};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::driver::{BrowserDriver, BrowserPage, BrowserSession};
use crate::error::{HarnessError, HarnessResult};

/// Configuration for the Playwright driver
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    pub browser: Browser,
    pub headless: bool,
    pub startup_timeout: Duration,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            browser: Browser::Chromium,
            headless: true,
            startup_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

/// Playwright-backed [`BrowserDriver`]
pub struct PlaywrightDriver {
    process: Arc<DriverProcess>,
}

struct DriverProcess {
    pipe: Mutex<Pipe>,
    next_id: AtomicU64,
    // Keeps the dispatcher script alive for the child's lifetime
    _script_dir: tempfile::TempDir,
}

struct Pipe {
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
}

impl PlaywrightDriver {
    /// Launch the browser and the dispatcher process.
    pub async fn launch(config: PlaywrightConfig) -> HarnessResult<Self> {
        Self::check_playwright_installed()?;

        let script_dir = tempfile::tempdir()?;
        let script_path = script_dir.path().join("driver.js");
        std::fs::write(&script_path, dispatcher_script(&config))?;

        debug!("Spawning Playwright dispatcher: {}", script_path.display());

        let node_path = std::env::current_dir()?.join("node_modules");
        let mut child = TokioCommand::new("node")
            .arg(&script_path)
            .env("NODE_PATH", node_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HarnessError::Driver(format!("failed to spawn node: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| HarnessError::Driver("driver stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HarnessError::Driver("driver stdout unavailable".into()))?;
        let mut lines = BufReader::new(stdout).lines();

        // The dispatcher emits one ready line once the browser is up
        let ready = tokio::time::timeout(config.startup_timeout, lines.next_line())
            .await
            .map_err(|_| HarnessError::Driver("browser launch timed out".into()))?
            .map_err(HarnessError::Io)?
            .ok_or_else(|| HarnessError::Driver("driver exited during launch".into()))?;

        let ready: Value = serde_json::from_str(&ready)?;
        if ready.get("ready") != Some(&Value::Bool(true)) {
            return Err(HarnessError::Driver(format!("unexpected ready line: {ready}")));
        }

        info!("Playwright {} ready (headless: {})", config.browser.as_str(), config.headless);

        Ok(Self {
            process: Arc::new(DriverProcess {
                pipe: Mutex::new(Pipe { child, stdin, lines }),
                next_id: AtomicU64::new(1),
                _script_dir: script_dir,
            }),
        })
    }

    /// Check that node can resolve the playwright package
    fn check_playwright_installed() -> HarnessResult<()> {
        let status = std::process::Command::new("node")
            .args(["-e", "require.resolve('playwright')"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match status {
            Ok(status) if status.success() => Ok(()),
            _ => Err(HarnessError::PlaywrightNotFound),
        }
    }

    /// Close the browser and let the dispatcher exit.
    pub async fn shutdown(&self) -> HarnessResult<()> {
        let _ = self.process.request(json!({ "cmd": "shutdown" }), "shutdown", None).await;
        let mut pipe = self.process.pipe.lock().await;
        if let Err(e) = pipe.child.wait().await {
            warn!("Dispatcher did not exit cleanly: {}", e);
            let _ = pipe.child.start_kill();
        }
        Ok(())
    }
}

impl DriverProcess {
    fn alloc_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Send one command and wait for its reply. `condition` names the
    /// operation for error reporting; `timeout_ms` is set for bounded waits so
    /// a Playwright timeout surfaces as [`HarnessError::NavigationTimeout`].
    async fn request(
        &self,
        mut payload: Value,
        condition: &str,
        timeout_ms: Option<u64>,
    ) -> HarnessResult<Value> {
        let id = self.alloc_id();
        payload["id"] = json!(id);

        let mut pipe = self.pipe.lock().await;
        let mut line = serde_json::to_string(&payload)?;
        line.push('\n');
        pipe.stdin.write_all(line.as_bytes()).await?;
        pipe.stdin.flush().await?;

        loop {
            let reply = pipe
                .lines
                .next_line()
                .await?
                .ok_or_else(|| HarnessError::Driver("driver process exited".into()))?;
            let reply: Value = serde_json::from_str(&reply)?;

            if reply.get("id").and_then(Value::as_u64) != Some(id) {
                warn!("Discarding out-of-order driver reply: {}", reply);
                continue;
            }

            if reply.get("ok") == Some(&Value::Bool(true)) {
                return Ok(reply.get("result").cloned().unwrap_or(Value::Null));
            }

            let error = reply
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown driver error")
                .to_string();

            if reply.get("timeout") == Some(&Value::Bool(true)) {
                return Err(HarnessError::NavigationTimeout {
                    condition: condition.to_string(),
                    timeout_ms: timeout_ms.unwrap_or(0),
                });
            }
            return Err(HarnessError::Driver(format!("{condition}: {error}")));
        }
    }
}

#[async_trait]
impl BrowserDriver for PlaywrightDriver {
    async fn open_session(
        &self,
        storage_state: Option<&Path>,
    ) -> HarnessResult<Box<dyn BrowserSession>> {
        let context_id = self.process.alloc_id();
        let payload = json!({
            "cmd": "newContext",
            "contextId": context_id,
            "storageState": storage_state.map(|p| p.to_string_lossy()),
        });
        self.process.request(payload, "open session", None).await?;

        debug!(context_id, seeded = storage_state.is_some(), "Opened browser context");

        Ok(Box::new(PlaywrightSession {
            process: Arc::clone(&self.process),
            context_id,
        }))
    }
}

struct PlaywrightSession {
    process: Arc<DriverProcess>,
    context_id: u64,
}

#[async_trait]
impl BrowserSession for PlaywrightSession {
    async fn new_page(&self, init_script: Option<&str>) -> HarnessResult<Box<dyn BrowserPage>> {
        let page_id = self.process.alloc_id();
        let payload = json!({
            "cmd": "newPage",
            "contextId": self.context_id,
            "pageId": page_id,
            "initScript": init_script,
        });
        self.process.request(payload, "new page", None).await?;

        Ok(Box::new(PlaywrightPage {
            process: Arc::clone(&self.process),
            page_id,
        }))
    }

    async fn storage_state(&self) -> HarnessResult<Value> {
        let payload = json!({ "cmd": "storageState", "contextId": self.context_id });
        self.process.request(payload, "storage state", None).await
    }

    async fn close(&mut self) -> HarnessResult<()> {
        let payload = json!({ "cmd": "closeContext", "contextId": self.context_id });
        self.process.request(payload, "close session", None).await?;
        Ok(())
    }
}

struct PlaywrightPage {
    process: Arc<DriverProcess>,
    page_id: u64,
}

impl PlaywrightPage {
    async fn page_request(
        &self,
        cmd: &str,
        extra: Value,
        condition: &str,
        timeout_ms: Option<u64>,
    ) -> HarnessResult<Value> {
        let mut payload = json!({ "cmd": cmd, "pageId": self.page_id });
        if let (Some(obj), Some(extra)) = (payload.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                obj.insert(k.clone(), v.clone());
            }
        }
        self.process.request(payload, condition, timeout_ms).await
    }
}

#[async_trait]
impl BrowserPage for PlaywrightPage {
    async fn goto(&self, url: &str, timeout: Duration) -> HarnessResult<()> {
        let ms = timeout.as_millis() as u64;
        self.page_request(
            "goto",
            json!({ "url": url, "timeoutMs": ms }),
            &format!("navigate to {url}"),
            Some(ms),
        )
        .await?;
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> HarnessResult<()> {
        self.page_request(
            "fill",
            json!({ "selector": selector, "value": value }),
            &format!("fill {selector}"),
            None,
        )
        .await?;
        Ok(())
    }

    async fn click(&self, selector: &str) -> HarnessResult<()> {
        self.page_request(
            "click",
            json!({ "selector": selector }),
            &format!("click {selector}"),
            None,
        )
        .await?;
        Ok(())
    }

    async fn wait_for_url(&self, glob: &str, timeout: Duration) -> HarnessResult<()> {
        let ms = timeout.as_millis() as u64;
        self.page_request(
            "waitForUrl",
            json!({ "glob": glob, "timeoutMs": ms }),
            &format!("url matching {glob}"),
            Some(ms),
        )
        .await?;
        Ok(())
    }

    async fn wait_for_network_idle(&self, timeout: Duration) -> HarnessResult<()> {
        let ms = timeout.as_millis() as u64;
        self.page_request(
            "waitForNetworkIdle",
            json!({ "timeoutMs": ms }),
            "network idle",
            Some(ms),
        )
        .await?;
        Ok(())
    }

    async fn current_url(&self) -> HarnessResult<String> {
        let result = self.page_request("currentUrl", json!({}), "current url", None).await?;
        expect_string(result, "current url")
    }

    async fn title(&self) -> HarnessResult<String> {
        let result = self.page_request("title", json!({}), "page title", None).await?;
        expect_string(result, "page title")
    }

    async fn is_visible(&self, selector: &str) -> HarnessResult<bool> {
        let condition = format!("visibility of {selector}");
        let result = self
            .page_request("isVisible", json!({ "selector": selector }), &condition, None)
            .await?;
        expect_bool(result, &condition)
    }

    async fn inner_text(&self, selector: &str) -> HarnessResult<String> {
        let condition = format!("text of {selector}");
        let result = self
            .page_request("innerText", json!({ "selector": selector }), &condition, None)
            .await?;
        expect_string(result, &condition)
    }

    async fn close(&mut self) -> HarnessResult<()> {
        self.page_request("closePage", json!({}), "close page", None).await?;
        Ok(())
    }
}

/// A reply that is not the expected JSON type means the dispatcher and the
/// driver disagree on the protocol; surface that instead of a default value.
fn expect_string(result: Value, condition: &str) -> HarnessResult<String> {
    match result {
        Value::String(s) => Ok(s),
        other => Err(HarnessError::Driver(format!(
            "malformed reply for {condition}: expected a string, got {other}"
        ))),
    }
}

fn expect_bool(result: Value, condition: &str) -> HarnessResult<bool> {
    match result {
        Value::Bool(b) => Ok(b),
        other => Err(HarnessError::Driver(format!(
            "malformed reply for {condition}: expected a boolean, got {other}"
        ))),
    }
}

/// Render the dispatcher script for a launch configuration.
fn dispatcher_script(config: &PlaywrightConfig) -> String {
    DISPATCHER_TEMPLATE
        .replace("__BROWSER__", config.browser.as_str())
        .replace("__HEADLESS__", if config.headless { "true" } else { "false" })
}

const DISPATCHER_TEMPLATE: &str = r#"
const { chromium, firefox, webkit } = require('playwright');
const readline = require('readline');

const engines = { chromium, firefox, webkit };

(async () => {
  const browser = await engines['__BROWSER__'].launch({ headless: __HEADLESS__ });
  const contexts = new Map();
  const pages = new Map();

  const reply = (obj) => process.stdout.write(JSON.stringify(obj) + '\n');

  const context = (req) => {
    const ctx = contexts.get(req.contextId);
    if (!ctx) throw new Error('unknown context ' + req.contextId);
    return ctx;
  };
  const page = (req) => {
    const p = pages.get(req.pageId);
    if (!p) throw new Error('unknown page ' + req.pageId);
    return p;
  };

  async function dispatch(req) {
    switch (req.cmd) {
      case 'newContext': {
        const opts = {};
        if (req.storageState) opts.storageState = req.storageState;
        contexts.set(req.contextId, await browser.newContext(opts));
        return null;
      }
      case 'newPage': {
        const p = await context(req).newPage();
        if (req.initScript) await p.addInitScript(req.initScript);
        pages.set(req.pageId, p);
        return null;
      }
      case 'storageState':
        return await context(req).storageState();
      case 'closeContext': {
        const ctx = contexts.get(req.contextId);
        if (ctx) { await ctx.close(); contexts.delete(req.contextId); }
        return null;
      }
      case 'goto':
        await page(req).goto(req.url, { waitUntil: 'domcontentloaded', timeout: req.timeoutMs });
        return null;
      case 'fill':
        await page(req).fill(req.selector, req.value);
        return null;
      case 'click':
        await page(req).click(req.selector);
        return null;
      case 'waitForUrl':
        await page(req).waitForURL(req.glob, { timeout: req.timeoutMs });
        return null;
      case 'waitForNetworkIdle':
        await page(req).waitForLoadState('networkidle', { timeout: req.timeoutMs });
        return null;
      case 'currentUrl':
        return page(req).url();
      case 'title':
        return await page(req).title();
      case 'isVisible':
        return await page(req).isVisible(req.selector);
      case 'innerText':
        return await page(req).innerText(req.selector);
      case 'closePage': {
        const p = pages.get(req.pageId);
        if (p) { await p.close(); pages.delete(req.pageId); }
        return null;
      }
      case 'shutdown':
        await browser.close();
        reply({ id: req.id, ok: true, result: null });
        process.exit(0);
      default:
        throw new Error('unknown command: ' + req.cmd);
    }
  }

  reply({ ready: true });

  const rl = readline.createInterface({ input: process.stdin });
  for await (const line of rl) {
    if (!line.trim()) continue;
    let req;
    try {
      req = JSON.parse(line);
    } catch (e) {
      reply({ id: -1, ok: false, error: 'bad request: ' + e.message });
      continue;
    }
    try {
      const result = await dispatch(req);
      reply({ id: req.id, ok: true, result });
    } catch (e) {
      reply({ id: req.id, ok: false, timeout: e.name === 'TimeoutError', error: String(e.message || e) });
    }
  }

  await browser.close();
})().catch((e) => {
  process.stderr.write(String((e && e.stack) || e) + '\n');
  process.exit(1);
});
"#;
