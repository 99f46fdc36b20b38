//! Harness configuration, read once from the environment at startup

use std::path::PathBuf;
use std::time::Duration;

/// Configuration shared by every suite in a test run.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Base URL of the Invoice Parser application under test
    pub base_url: String,

    /// Run the browser headless (always true in CI)
    pub headless: bool,

    /// Path of the persisted auth state artifact
    pub auth_state_path: PathBuf,

    /// Init script applied to every fresh page in a suite
    pub init_script: Option<String>,

    /// Bound for any single navigation or wait condition
    pub navigation_timeout: Duration,

    /// Bound for the whole login-and-persist sequence
    pub login_timeout: Duration,

    /// How the login form is driven
    pub login: LoginSpec,
}

/// Describes the application's login form and its success signal.
#[derive(Debug, Clone)]
pub struct LoginSpec {
    /// Login route, relative to the base URL
    pub login_path: String,

    /// Placeholder text of the username field
    pub username_placeholder: String,

    /// Placeholder text of the password field
    pub password_placeholder: String,

    /// Accessible name of the submit button
    pub submit_button: String,

    /// URL glob the application redirects to on success
    pub success_url_glob: String,

    pub username: String,
    pub password: String,
}

impl Default for LoginSpec {
    fn default() -> Self {
        Self {
            login_path: "/login".to_string(),
            username_placeholder: "Enter username".to_string(),
            password_placeholder: "Enter password".to_string(),
            submit_button: "Sign In".to_string(),
            success_url_glob: "**/dashboard".to_string(),
            username: "admin".to_string(),
            password: "admin".to_string(),
        }
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            headless: true,
            auth_state_path: PathBuf::from("auth_state.json"),
            init_script: Some("localStorage.setItem('auth_token', 'true');".to_string()),
            navigation_timeout: Duration::from_secs(10),
            login_timeout: Duration::from_secs(30),
            login: LoginSpec::default(),
        }
    }
}

impl HarnessConfig {
    /// Build configuration from the environment.
    ///
    /// `BASE_URL` overrides the application location (CI sets this), `CI=true`
    /// forces headless, and `AUTH_STATE_PATH` relocates the shared artifact.
    /// Credentials come from `INVPARSER_USERNAME` / `INVPARSER_PASSWORD` when
    /// set.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("BASE_URL") {
            config.base_url = url.trim_end_matches('/').to_string();
        }

        // Headed locally, headless in CI
        config.headless = std::env::var("CI").map(|v| v == "true").unwrap_or(false);

        if let Ok(path) = std::env::var("AUTH_STATE_PATH") {
            config.auth_state_path = PathBuf::from(path);
        }

        if let Ok(user) = std::env::var("INVPARSER_USERNAME") {
            config.login.username = user;
        }
        if let Ok(pass) = std::env::var("INVPARSER_PASSWORD") {
            config.login.password = pass;
        }

        config
    }

    /// Join a path onto the base URL.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_join() {
        let config = HarnessConfig {
            base_url: "http://localhost:3000".to_string(),
            ..Default::default()
        };
        assert_eq!(config.url("/dashboard"), "http://localhost:3000/dashboard");
        assert_eq!(config.url("invoices"), "http://localhost:3000/invoices");
    }

    #[test]
    fn test_defaults_match_application() {
        let login = LoginSpec::default();
        assert_eq!(login.login_path, "/login");
        assert_eq!(login.success_url_glob, "**/dashboard");
    }
}
