//! Configuration sources
//!
//! The cache URL is resolved every time a connection is about to be
//! established, not when the handle is built, so a process can start before
//! its environment is complete and a handle can be pointed elsewhere after a
//! `reset()`.

use std::sync::Once;

/// Environment variable holding the cache URL
pub const DEFAULT_URL_VAR: &str = "REDIS_URL";

static DOTENV: Once = Once::new();

/// Load `.env` into the process environment, once per process
///
/// A missing `.env` file is not an error; variables already set in the
/// environment win over the file.
pub fn load_dotenv() {
    DOTENV.call_once(|| match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error = %e, "failed to load .env"),
    });
}

/// Where a handle gets its connection URL
pub trait UrlSource: Send + Sync {
    /// Current URL, or `None` when not configured
    fn resolve(&self) -> Option<String>;

    /// Human-readable name for error messages
    fn describe(&self) -> String;
}

/// Read the URL from an environment variable
#[derive(Debug, Clone)]
pub struct EnvUrl {
    var: String,
    dotenv: bool,
}

impl EnvUrl {
    /// Read `var`, loading `.env` first
    pub fn new(var: impl Into<String>) -> Self {
        Self {
            var: var.into(),
            dotenv: true,
        }
    }

    /// Do not consult `.env`
    pub fn without_dotenv(mut self) -> Self {
        self.dotenv = false;
        self
    }

    /// Name of the variable
    pub fn var(&self) -> &str {
        &self.var
    }
}

impl Default for EnvUrl {
    fn default() -> Self {
        Self::new(DEFAULT_URL_VAR)
    }
}

impl UrlSource for EnvUrl {
    fn resolve(&self) -> Option<String> {
        if self.dotenv {
            load_dotenv();
        }
        std::env::var(&self.var)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn describe(&self) -> String {
        format!("environment variable {}", self.var)
    }
}

/// A fixed URL
#[derive(Debug, Clone)]
pub struct FixedUrl(pub String);

impl UrlSource for FixedUrl {
    fn resolve(&self) -> Option<String> {
        Some(self.0.clone())
    }

    fn describe(&self) -> String {
        "fixed URL".to_string()
    }
}

impl<F> UrlSource for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn resolve(&self) -> Option<String> {
        self()
    }

    fn describe(&self) -> String {
        "URL provider".to_string()
    }
}
