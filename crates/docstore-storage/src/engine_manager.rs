//! Pool manager handing out sessions on one opened LanceDB engine.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use docstore_engine::Engine;
use tokio::time::Instant;
use tracing::info;

use crate::error::StoreError;
use crate::pool::ConnectionManager;

/// A leased session on the engine.
pub struct EngineConnection {
    id: u64,
    engine: Arc<Engine>,
    opened_at: Instant,
}

impl EngineConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }
}

/// Opens the engine once; connections share it.
pub struct EngineManager {
    engine: Arc<Engine>,
    next_id: AtomicU64,
}

impl EngineManager {
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let engine = Engine::open(path).await?;
        info!(path = %path.display(), "Engine manager ready");
        Ok(Self::with_engine(Arc::new(engine)))
    }

    pub fn with_engine(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            next_id: AtomicU64::new(0),
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }
}

#[async_trait]
impl ConnectionManager for EngineManager {
    type Connection = EngineConnection;

    async fn connect(&self) -> Result<EngineConnection, StoreError> {
        Ok(EngineConnection {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            engine: Arc::clone(&self.engine),
            opened_at: Instant::now(),
        })
    }

    fn is_valid(&self, conn: &EngineConnection) -> bool {
        Arc::ptr_eq(&conn.engine, &self.engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Pool, PoolConfig};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_connections_share_engine() {
        let temp = TempDir::new().unwrap();
        let manager = EngineManager::open(temp.path()).await.unwrap();
        let pool = Pool::new(manager, PoolConfig::default()).unwrap();

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert_ne!(a.id(), b.id());
        assert!(Arc::ptr_eq(a.engine(), b.engine()));
        assert!(pool.manager().is_valid(&a));
    }
}
