//! Invoice Parser E2E Test Harness
//!
//! This crate provides the browser-side plumbing shared by every Invoice
//! Parser UI test suite:
//! - A durable, cross-run auth-state cache with singleflight login
//! - Suite-scoped browser sessions and per-test execution units
//! - A Playwright driver controlled over a JSON stdio protocol
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Test suites (cargo test)                 │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Suite                                                       │
//! │    ├── start()      -> probe app, ensure auth, open session  │
//! │    ├── run_test()   -> fresh ExecutionUnit, always released  │
//! │    └── shutdown()   -> close session, keep artifact          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  SessionCache                                                │
//! │    ├── ensure()     -> reuse artifact | singleflight login   │
//! │    └── invalidate() -> drop artifact for the next run        │
//! ├──────────────────────────────────────────────────────────────┤
//! │  BrowserDriver / BrowserSession / BrowserPage (traits)       │
//! │    └── PlaywrightDriver: node subprocess, JSON line protocol │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The artifact on disk is Playwright storage state (`auth_state.json`): a
//! JSON object with `cookies` and `origins`. It is created exactly once per
//! run even when suites race for it, written atomically, and reused read-only
//! by every suite until invalidated.

pub mod config;
pub mod driver;
pub mod error;
pub mod harness;
pub mod playwright;
pub mod session_cache;

pub use config::{HarnessConfig, LoginSpec};
pub use driver::{BrowserDriver, BrowserPage, BrowserSession};
pub use error::{HarnessError, HarnessResult};
pub use harness::{ExecutionUnit, Suite};
pub use playwright::{Browser, PlaywrightConfig, PlaywrightDriver};
pub use session_cache::{AuthArtifact, SessionCache};
