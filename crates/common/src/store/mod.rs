//! Task state store
//!
//! Provides:
//! - `TaskStore` abstraction over where task snapshots live
//! - Process-local implementation
//! - Redis implementation so snapshots survive restarts

use crate::config::{TaskStoreBackend, TaskStoreConfig};
use crate::errors::{AppError, Result};
use crate::models::Task;
use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, Client};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task. Fails with `Duplicate` if the id was ever used.
    async fn create(&self, task: &Task) -> Result<()>;

    /// Overwrite the snapshot of an existing task
    async fn save(&self, task: &Task) -> Result<()>;

    async fn load(&self, id: &str) -> Result<Option<Task>>;
}

#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<String, Task>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, task: &Task) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(AppError::Duplicate {
                message: format!("task id already used: {}", task.id),
            });
        }
        tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn save(&self, task: &Task) -> Result<()> {
        self.tasks
            .write()
            .await
            .insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<Task>> {
        Ok(self.tasks.read().await.get(id).cloned())
    }
}

/// Redis-backed store. Snapshots are JSON strings under `{prefix}:task:{id}`.
pub struct RedisTaskStore {
    connection: RwLock<MultiplexedConnection>,
    key_prefix: String,
    ttl_secs: u64,
}

impl RedisTaskStore {
    pub async fn new(config: &TaskStoreConfig) -> Result<Self> {
        let client = Client::open(config.redis_url.as_str()).map_err(|e| AppError::CacheError {
            message: format!("Failed to create Redis client: {}", e),
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to connect to Redis: {}", e),
            })?;

        info!(prefix = %config.key_prefix, "Redis task store connected");

        Ok(Self {
            connection: RwLock::new(connection),
            key_prefix: config.key_prefix.clone(),
            ttl_secs: config.ttl_secs,
        })
    }

    fn key(&self, id: &str) -> String {
        format!("{}:task:{}", self.key_prefix, id)
    }

    /// Ping Redis to check connectivity
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.write().await;
        redis::cmd("PING")
            .query_async::<String>(&mut *conn)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Redis ping failed: {}", e),
            })?;
        Ok(())
    }
}

#[async_trait]
impl TaskStore for RedisTaskStore {
    async fn create(&self, task: &Task) -> Result<()> {
        let key = self.key(&task.id);
        let json = serde_json::to_string(task)?;
        let mut conn = self.connection.write().await;

        let created: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&json)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async(&mut *conn)
            .await
            .map_err(|e| AppError::PersistenceFailure {
                message: format!("Failed to create task '{}': {}", key, e),
            })?;

        if created.is_none() {
            return Err(AppError::Duplicate {
                message: format!("task id already used: {}", task.id),
            });
        }

        debug!(key = %key, "Task created");
        Ok(())
    }

    async fn save(&self, task: &Task) -> Result<()> {
        let key = self.key(&task.id);
        let json = serde_json::to_string(task)?;
        let mut conn = self.connection.write().await;

        redis::cmd("SET")
            .arg(&key)
            .arg(&json)
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async::<()>(&mut *conn)
            .await
            .map_err(|e| AppError::PersistenceFailure {
                message: format!("Failed to save task '{}': {}", key, e),
            })?;

        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<Task>> {
        let key = self.key(id);
        let mut conn = self.connection.write().await;

        let value: Option<String> = redis::cmd("GET")
            .arg(&key)
            .query_async(&mut *conn)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to get key '{}': {}", key, e),
            })?;

        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

/// Build the store selected by configuration
pub async fn create_task_store(config: &TaskStoreConfig) -> Result<Arc<dyn TaskStore>> {
    match config.store {
        TaskStoreBackend::Memory => Ok(Arc::new(InMemoryTaskStore::new())),
        TaskStoreBackend::Redis => {
            let store = RedisTaskStore::new(config).await?;
            store.ping().await?;
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FileResult, TaskStatus};

    #[tokio::test]
    async fn test_create_rejects_reused_id() {
        let store = InMemoryTaskStore::new();
        let task = Task::with_id("t1");
        store.create(&task).await.unwrap();

        let err = store.create(&task).await.unwrap_err();
        assert!(matches!(err, AppError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn test_save_and_load_snapshot() {
        let store = InMemoryTaskStore::new();
        let mut task = Task::with_id("t1");
        store.create(&task).await.unwrap();

        task.files_total = 1;
        task.record(FileResult::done("a.json", "/api/template/download/filled_a.json"));
        task.finish(TaskStatus::Completed);
        store.save(&task).await.unwrap();

        let loaded = store.load("t1").await.unwrap().unwrap();
        assert_eq!(loaded, task);
        assert!(store.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_backend_from_config() {
        let store = create_task_store(&TaskStoreConfig::default()).await.unwrap();
        store.create(&Task::with_id("x")).await.unwrap();
        assert!(store.load("x").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unreachable_redis_fails_at_startup() {
        let config = TaskStoreConfig {
            store: TaskStoreBackend::Redis,
            redis_url: "redis://127.0.0.1:1".to_string(),
            ..Default::default()
        };
        let result = create_task_store(&config).await;
        assert!(matches!(result, Err(AppError::CacheError { .. })));
    }
}
