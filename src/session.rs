//! Websocket session registry
//!
//! A session token is a v4 UUID handed to a client before it opens a
//! websocket. The cache holds two records per session:
//!
//! * `ws:{token}`: hash with `purpose`, `entity_id` and `entity_type`
//! * `{entity_type}:{entity_id}`: set of every token (broadcast id) attached
//!   to that entity, used to fan messages out to peers

use crate::handle::CacheHandle;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// What a session token was issued for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPayload {
    /// Route the websocket is allowed to use, e.g. `/shopping-list/modify`
    pub purpose: String,
    /// Kind of entity, e.g. `modifyShoppingListSession`
    pub entity_type: String,
    /// Id of the entity
    pub entity_id: i64,
}

impl SessionPayload {
    /// Cache key of the set holding every token for this entity
    pub fn entity_key(&self) -> String {
        entity_key(&self.entity_type, self.entity_id)
    }

    fn from_fields(fields: HashMap<String, String>) -> Result<Option<Self>> {
        if fields.is_empty() {
            return Ok(None);
        }

        let field = |name: &str| {
            fields
                .get(name)
                .cloned()
                .ok_or_else(|| Error::Protocol(format!("session hash is missing field {}", name)))
        };

        let entity_id = field("entity_id")?;
        let entity_id = entity_id.parse().map_err(|_| {
            Error::Protocol(format!("session entity_id is not numeric: {}", entity_id))
        })?;

        Ok(Some(Self {
            purpose: field("purpose")?,
            entity_type: field("entity_type")?,
            entity_id,
        }))
    }
}

/// Creates, resolves and tears down websocket sessions
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    cache: Arc<CacheHandle>,
}

impl SessionRegistry {
    /// Registry backed by a shared cache handle
    pub fn new(cache: Arc<CacheHandle>) -> Self {
        Self { cache }
    }

    /// Issue a token for `entity_type:entity_id` and record it
    pub async fn open_session(
        &self,
        purpose: &str,
        entity_type: &str,
        entity_id: i64,
    ) -> Result<String> {
        let token = Uuid::new_v4().to_string();
        let id = entity_id.to_string();
        let conn = self.cache.acquire().await?;

        conn.hset_multiple(
            &session_key(&token),
            &[
                ("purpose", purpose),
                ("entity_id", &id),
                ("entity_type", entity_type),
            ],
        )
        .await?;
        conn.sadd(&entity_key(entity_type, entity_id), &token).await?;

        tracing::debug!(entity_type, entity_id, "websocket session opened");
        Ok(token)
    }

    /// Look up a token; `None` if it was never issued or has been closed
    pub async fn session(&self, token: &str) -> Result<Option<SessionPayload>> {
        let conn = self.cache.acquire().await?;
        let fields = conn.hgetall(&session_key(token)).await?;
        SessionPayload::from_fields(fields)
    }

    /// Detach a token from its entity and forget it
    pub async fn close_session(&self, token: &str) -> Result<()> {
        let Some(payload) = self.session(token).await? else {
            return Ok(());
        };

        let conn = self.cache.acquire().await?;
        conn.srem(&payload.entity_key(), token).await?;
        conn.del(&[&session_key(token)]).await?;

        tracing::debug!(
            entity_type = %payload.entity_type,
            entity_id = payload.entity_id,
            "websocket session closed"
        );
        Ok(())
    }

    /// Every token attached to an entity
    pub async fn broadcast_ids(&self, entity_type: &str, entity_id: i64) -> Result<Vec<String>> {
        let conn = self.cache.acquire().await?;
        conn.smembers(&entity_key(entity_type, entity_id)).await
    }

    /// Every token attached to the same entity as `token`, itself included
    pub async fn broadcast_ids_for_token(&self, token: &str) -> Result<Vec<String>> {
        match self.session(token).await? {
            Some(payload) => {
                self.broadcast_ids(&payload.entity_type, payload.entity_id)
                    .await
            }
            None => Ok(Vec::new()),
        }
    }

    /// Drop a broadcast id that no longer has a live websocket
    pub async fn prune(&self, entity_type: &str, entity_id: i64, broadcast_id: &str) -> Result<()> {
        let conn = self.cache.acquire().await?;
        let removed = conn
            .srem(&entity_key(entity_type, entity_id), broadcast_id)
            .await?;
        if removed > 0 {
            tracing::warn!(
                entity_type,
                entity_id,
                broadcast_id,
                "pruned broadcast id with no websocket"
            );
        }
        Ok(())
    }
}

fn session_key(token: &str) -> String {
    format!("ws:{}", token)
}

fn entity_key(entity_type: &str, entity_id: i64) -> String {
    format!("{}:{}", entity_type, entity_id)
}
