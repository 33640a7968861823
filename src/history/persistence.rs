//! History persistence backends
//!
//! A backend stores whole `ChatHistoryState` snapshots keyed by a scope
//! string (a user, a device, a deployment). The manager decides when to load
//! and save; backends only move bytes.

use crate::config::AppConfig;
use crate::error::AssistantError;
use crate::models::ChatHistoryState;
use crate::Result;
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{info, warn};

/// Trait for history persistence
#[async_trait]
pub trait HistoryPersistence: Send + Sync {
    async fn load(&self, scope: &str) -> Result<Option<ChatHistoryState>>;
    async fn save(&self, scope: &str, state: &ChatHistoryState) -> Result<()>;
}

//
// ================= In-Memory =================
//

/// In-memory backend for development and tests
pub struct InMemoryPersistence {
    snapshots: RwLock<HashMap<String, ChatHistoryState>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self {
            snapshots: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistoryPersistence for InMemoryPersistence {
    async fn load(&self, scope: &str) -> Result<Option<ChatHistoryState>> {
        Ok(self.snapshots.read().await.get(scope).cloned())
    }

    async fn save(&self, scope: &str, state: &ChatHistoryState) -> Result<()> {
        self.snapshots
            .write()
            .await
            .insert(scope.to_string(), state.clone());
        Ok(())
    }
}

//
// ================= JSON File =================
//

/// One JSON file holding `{ scope: ChatHistoryState }`.
pub struct JsonFilePersistence {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<HashMap<String, ChatHistoryState>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(HashMap::new()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                AssistantError::Persistence(format!(
                    "Corrupt history file {}: {}",
                    self.path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl HistoryPersistence for JsonFilePersistence {
    async fn load(&self, scope: &str) -> Result<Option<ChatHistoryState>> {
        let mut all = self.read_all().await?;
        Ok(all.remove(scope))
    }

    async fn save(&self, scope: &str, state: &ChatHistoryState) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut all = self.read_all().await?;
        all.insert(scope.to_string(), state.clone());

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Replace the file atomically.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&all)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

//
// ================= Postgres =================
//

/// Snapshot table keyed by scope, created on first use.
pub struct PostgresPersistence {
    pool: PgPool,
    schema_ready: OnceCell<()>,
}

impl PostgresPersistence {
    pub fn connect_lazy(url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(url)?;

        Ok(Self {
            pool,
            schema_ready: OnceCell::new(),
        })
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS chat_history_snapshots (
                      scope TEXT PRIMARY KEY,
                      state TEXT NOT NULL,
                      updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                AssistantError::Persistence(format!(
                    "Failed to initialize chat history schema: {}",
                    e
                ))
            })?;

        Ok(())
    }
}

#[async_trait]
impl HistoryPersistence for PostgresPersistence {
    async fn load(&self, scope: &str) -> Result<Option<ChatHistoryState>> {
        self.ensure_schema().await?;

        let row = sqlx::query("SELECT state FROM chat_history_snapshots WHERE scope = $1")
            .bind(scope)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AssistantError::Persistence(format!("Failed to load chat history: {}", e))
            })?;

        let Some(row) = row else {
            return Ok(None);
        };

        let raw: String = row.try_get("state")?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    async fn save(&self, scope: &str, state: &ChatHistoryState) -> Result<()> {
        self.ensure_schema().await?;

        let raw = serde_json::to_string(state)?;
        sqlx::query(
            r#"
            INSERT INTO chat_history_snapshots (scope, state, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (scope) DO UPDATE SET state = EXCLUDED.state, updated_at = NOW()
            "#,
        )
        .bind(scope)
        .bind(raw)
        .execute(&self.pool)
        .await
        .map_err(|e| AssistantError::Persistence(format!("Failed to save chat history: {}", e)))?;

        Ok(())
    }
}

/// Pick a backend from configuration: Postgres, then JSON file, then memory.
pub fn build_persistence(config: &AppConfig) -> Arc<dyn HistoryPersistence> {
    if let Some(url) = config.database_url.as_deref() {
        match PostgresPersistence::connect_lazy(url) {
            Ok(backend) => {
                info!("Chat history backend: postgres");
                return Arc::new(backend);
            }
            Err(error) => {
                warn!(
                    "Failed to initialize postgres history backend, falling back: {}",
                    error
                );
            }
        }
    }

    if let Some(path) = config.history_file.as_ref() {
        info!(path = %path.display(), "Chat history backend: json file");
        return Arc::new(JsonFilePersistence::new(path.clone()));
    }

    info!("Chat history backend: in-memory");
    Arc::new(InMemoryPersistence::new())
}
