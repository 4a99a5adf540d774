//! Revoked access token blacklist

use crate::handle::CacheHandle;
use crate::Result;
use std::sync::Arc;
use std::time::Duration;

/// Records revoked bearer tokens until they would have expired anyway
#[derive(Debug, Clone)]
pub struct TokenBlacklist {
    cache: Arc<CacheHandle>,
}

impl TokenBlacklist {
    /// Blacklist backed by a shared cache handle
    pub fn new(cache: Arc<CacheHandle>) -> Self {
        Self { cache }
    }

    /// Reject `token` for the next `ttl`
    pub async fn revoke(&self, token: &str, ttl: Duration) -> Result<()> {
        let conn = self.cache.acquire().await?;
        conn.set_ex(sanitize(token), "1", ttl).await?;
        tracing::debug!(ttl_secs = ttl.as_secs(), "token revoked");
        Ok(())
    }

    /// Whether `token` has been revoked and not yet expired
    pub async fn is_revoked(&self, token: &str) -> Result<bool> {
        let conn = self.cache.acquire().await?;
        Ok(conn.get(sanitize(token)).await?.is_some())
    }
}

/// Strip a `Bearer` scheme and surrounding whitespace
fn sanitize(token: &str) -> &str {
    let token = token.trim();
    token.strip_prefix("Bearer").unwrap_or(token).trim()
}
