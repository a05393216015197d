//! Bounded pool of engine handles.
//!
//! A semaphore caps the number of leased handles. Released handles go back
//! to an idle stack and are reused newest-first; handles idle longer than
//! the configured age, or rejected by the manager's health check, are
//! destroyed instead of reused.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use docstore_types::PoolSettings;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::error::StoreError;

/// Creates and health-checks pooled handles.
#[async_trait]
pub trait ConnectionManager: Send + Sync + 'static {
    type Connection: Send + 'static;

    async fn connect(&self) -> Result<Self::Connection, StoreError>;

    /// Whether an idle handle may be handed out again.
    fn is_valid(&self, conn: &Self::Connection) -> bool;
}

/// Pool sizing and timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_size: usize,
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from(&PoolSettings::default())
    }
}

impl From<&PoolSettings> for PoolConfig {
    fn from(settings: &PoolSettings) -> Self {
        Self {
            max_size: settings.max_size,
            idle_timeout: Duration::from_secs(settings.idle_timeout_secs),
            acquire_timeout: Duration::from_millis(settings.acquire_timeout_ms),
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.max_size == 0 {
            return Err(StoreError::Config("pool max_size must be > 0".into()));
        }
        if self.acquire_timeout.is_zero() {
            return Err(StoreError::Config("pool acquire_timeout must be > 0".into()));
        }
        Ok(())
    }
}

/// Point-in-time pool counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub max_size: usize,
    pub total: usize,
    pub idle: usize,
    pub leased: usize,
    pub created: u64,
    pub destroyed: u64,
    pub timeouts: u64,
}

struct IdleConn<C> {
    conn: C,
    last_used: Instant,
}

struct PoolState<C> {
    idle: VecDeque<IdleConn<C>>,
    total: usize,
}

struct PoolInner<M: ConnectionManager> {
    manager: M,
    config: PoolConfig,
    permits: Arc<Semaphore>,
    state: Mutex<PoolState<M::Connection>>,
    closed: AtomicBool,
    created: AtomicU64,
    destroyed: AtomicU64,
    timeouts: AtomicU64,
}

impl<M: ConnectionManager> PoolInner<M> {
    fn release(&self, conn: M::Connection) {
        let mut state = self.state.lock().expect("pool state poisoned");
        if self.closed.load(Ordering::SeqCst) {
            state.total -= 1;
            self.destroyed.fetch_add(1, Ordering::Relaxed);
            return;
        }
        state.idle.push_back(IdleConn {
            conn,
            last_used: Instant::now(),
        });
        let evicted = self.evict_expired(&mut state);
        if evicted > 0 {
            debug!(evicted, "Closed idle pool handles");
        }
    }

    fn evict_expired(&self, state: &mut PoolState<M::Connection>) -> usize {
        let idle_timeout = self.config.idle_timeout;
        let before = state.idle.len();
        state
            .idle
            .retain(|idle| idle.last_used.elapsed() <= idle_timeout);
        let evicted = before - state.idle.len();
        state.total -= evicted;
        self.destroyed.fetch_add(evicted as u64, Ordering::Relaxed);
        evicted
    }

    /// Pop the newest reusable idle handle, destroying stale ones on the way.
    fn take_idle(&self) -> Option<M::Connection> {
        let mut state = self.state.lock().expect("pool state poisoned");
        self.evict_expired(&mut state);
        while let Some(idle) = state.idle.pop_back() {
            if self.manager.is_valid(&idle.conn) {
                return Some(idle.conn);
            }
            state.total -= 1;
            self.destroyed.fetch_add(1, Ordering::Relaxed);
            debug!("Discarded unhealthy pool handle");
        }
        None
    }
}

/// Handle pool over a [`ConnectionManager`]. Cheap to clone.
pub struct Pool<M: ConnectionManager> {
    inner: Arc<PoolInner<M>>,
}

impl<M: ConnectionManager> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: ConnectionManager> Pool<M> {
    pub fn new(manager: M, config: PoolConfig) -> Result<Self, StoreError> {
        config.validate()?;
        info!(
            max_size = config.max_size,
            idle_timeout_secs = config.idle_timeout.as_secs(),
            "Created connection pool"
        );
        Ok(Self {
            inner: Arc::new(PoolInner {
                manager,
                permits: Arc::new(Semaphore::new(config.max_size)),
                config,
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    total: 0,
                }),
                closed: AtomicBool::new(false),
                created: AtomicU64::new(0),
                destroyed: AtomicU64::new(0),
                timeouts: AtomicU64::new(0),
            }),
        })
    }

    pub fn manager(&self) -> &M {
        &self.inner.manager
    }

    pub fn config(&self) -> PoolConfig {
        self.inner.config
    }

    /// Lease a handle, waiting up to the acquire timeout for one to free up.
    pub async fn acquire(&self) -> Result<PooledConnection<M>, StoreError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(StoreError::PoolClosed);
        }

        let waited = self.inner.config.acquire_timeout;
        let permit = match timeout(waited, Arc::clone(&self.inner.permits).acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(StoreError::PoolClosed),
            Err(_) => {
                self.inner.timeouts.fetch_add(1, Ordering::Relaxed);
                warn!(waited_ms = waited.as_millis() as u64, "Connection pool exhausted");
                return Err(StoreError::ConnectionExhausted { waited });
            }
        };

        let conn = match self.inner.take_idle() {
            Some(conn) => conn,
            None => {
                let conn = self.inner.manager.connect().await?;
                self.inner.state.lock().expect("pool state poisoned").total += 1;
                self.inner.created.fetch_add(1, Ordering::Relaxed);
                debug!("Opened pool handle");
                conn
            }
        };

        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    /// Close idle handles past the idle timeout. Returns how many closed.
    pub fn evict_idle(&self) -> usize {
        let mut state = self.inner.state.lock().expect("pool state poisoned");
        self.inner.evict_expired(&mut state)
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock().expect("pool state poisoned");
        PoolStats {
            max_size: self.inner.config.max_size,
            total: state.total,
            idle: state.idle.len(),
            leased: state.total - state.idle.len(),
            created: self.inner.created.load(Ordering::Relaxed),
            destroyed: self.inner.destroyed.load(Ordering::Relaxed),
            timeouts: self.inner.timeouts.load(Ordering::Relaxed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Refuse new leases and destroy idle handles. Leased handles are
    /// destroyed as they come back.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.permits.close();
        let mut state = self.inner.state.lock().expect("pool state poisoned");
        let dropped = state.idle.len();
        state.idle.clear();
        state.total -= dropped;
        self.inner
            .destroyed
            .fetch_add(dropped as u64, Ordering::Relaxed);
        info!(closed_idle = dropped, "Connection pool closed");
    }
}

/// A leased handle. Returned to the pool on drop.
pub struct PooledConnection<M: ConnectionManager> {
    conn: Option<M::Connection>,
    pool: Arc<PoolInner<M>>,
    _permit: OwnedSemaphorePermit,
}

impl<M: ConnectionManager> PooledConnection<M> {
    /// Give the handle back explicitly.
    pub fn release(self) {
        drop(self);
    }
}

impl<M: ConnectionManager> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl<M: ConnectionManager> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl<M: ConnectionManager> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingManager {
        next: AtomicUsize,
        reject_below: AtomicUsize,
    }

    impl CountingManager {
        fn new() -> Self {
            Self {
                next: AtomicUsize::new(0),
                reject_below: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ConnectionManager for CountingManager {
        type Connection = usize;

        async fn connect(&self) -> Result<usize, StoreError> {
            Ok(self.next.fetch_add(1, Ordering::SeqCst))
        }

        fn is_valid(&self, conn: &usize) -> bool {
            *conn >= self.reject_below.load(Ordering::SeqCst)
        }
    }

    fn config(max_size: usize) -> PoolConfig {
        PoolConfig {
            max_size,
            idle_timeout: Duration::from_secs(60),
            acquire_timeout: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn test_reuses_released_handle() {
        let pool = Pool::new(CountingManager::new(), config(2)).unwrap();

        let first = pool.acquire().await.unwrap();
        assert_eq!(*first, 0);
        first.release();

        let again = pool.acquire().await.unwrap();
        assert_eq!(*again, 0);
        let stats = pool.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.leased, 1);
        assert_eq!(stats.idle, 0);
    }

    #[tokio::test]
    async fn test_grows_up_to_max() {
        let pool = Pool::new(CountingManager::new(), config(2)).unwrap();
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert_ne!(*a, *b);
        assert_eq!(pool.stats().total, 2);
        assert_eq!(pool.stats().leased, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_after_wait() {
        let pool = Pool::new(CountingManager::new(), config(1)).unwrap();
        let _held = pool.acquire().await.unwrap();

        let err = pool.acquire().await.err().unwrap();
        assert!(matches!(
            err,
            StoreError::ConnectionExhausted { waited } if waited == Duration::from_millis(100)
        ));
        assert_eq!(pool.stats().timeouts, 1);
    }

    #[tokio::test]
    async fn test_waiter_gets_released_handle() {
        let pool = Pool::new(CountingManager::new(), config(1)).unwrap();
        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { *pool.acquire().await.unwrap() })
        };
        tokio::task::yield_now().await;
        drop(held);

        assert_eq!(waiter.await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_handles_expire() {
        let pool = Pool::new(CountingManager::new(), config(2)).unwrap();
        pool.acquire().await.unwrap().release();
        assert_eq!(pool.stats().idle, 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(pool.evict_idle(), 1);

        let stats = pool.stats();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.destroyed, 1);
        assert_eq!(*pool.acquire().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_invalid_idle_handle_replaced() {
        let pool = Pool::new(CountingManager::new(), config(2)).unwrap();
        pool.acquire().await.unwrap().release();
        pool.manager().reject_below.store(1, Ordering::SeqCst);

        let conn = pool.acquire().await.unwrap();
        assert_eq!(*conn, 1);
        assert_eq!(pool.stats().destroyed, 1);
    }

    #[tokio::test]
    async fn test_close_rejects_new_leases() {
        let pool = Pool::new(CountingManager::new(), config(2)).unwrap();
        let leased = pool.acquire().await.unwrap();
        pool.acquire().await.unwrap().release();

        pool.close();
        assert!(pool.is_closed());
        assert!(matches!(pool.acquire().await, Err(StoreError::PoolClosed)));
        assert_eq!(pool.stats().idle, 0);

        drop(leased);
        assert_eq!(pool.stats().total, 0);
    }

    #[test]
    fn test_zero_size_rejected() {
        assert!(Pool::new(CountingManager::new(), config(0)).is_err());
    }
}
