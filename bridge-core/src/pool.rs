// ABOUTME: Registry of per-Matrix-user IRC sessions, created lazily on first message
// ABOUTME: Lookup-and-create is serialised per user so each user gets at most one connection

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

/// A session handed out by the pool.
#[derive(Debug, Clone)]
pub struct Checkout<S> {
    pub session: S,
    /// True when this call ran the factory and opened a new connection.
    pub created: bool,
}

/// Maps Matrix user IDs to their IRC session.
///
/// The map lock only guards finding the per-user cell. The connection itself
/// is opened inside the cell, so a slow connect for one user never blocks
/// lookups for another, while concurrent deliveries for the same user wait
/// for the single in-flight connect.
pub struct SessionPool<S> {
    sessions: Mutex<HashMap<String, Arc<OnceCell<S>>>>,
}

impl<S> Default for SessionPool<S> {
    fn default() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

impl<S: Clone> SessionPool<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the session for `user_id`, building it with `factory` if absent.
    ///
    /// A factory error leaves no session behind; the next call for the same
    /// user runs the factory again.
    pub async fn get_or_create<F, Fut, E>(&self, user_id: &str, factory: F) -> Result<Checkout<S>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<S, E>>,
    {
        let cell = {
            let mut sessions = self.sessions.lock().await;
            Arc::clone(sessions.entry(user_id.to_string()).or_default())
        };

        let mut created = false;
        let session = cell
            .get_or_try_init(|| {
                created = true;
                factory()
            })
            .await?;

        Ok(Checkout {
            session: session.clone(),
            created,
        })
    }

    pub async fn get(&self, user_id: &str) -> Option<S> {
        let sessions = self.sessions.lock().await;
        sessions.get(user_id).and_then(|cell| cell.get().cloned())
    }

    /// Remove the session for `user_id` if `is_dead` holds for it.
    ///
    /// Checking the current entry under the lock keeps a replacement session,
    /// opened by a concurrent delivery, from being evicted by mistake.
    pub async fn remove_if<P>(&self, user_id: &str, is_dead: P) -> Option<S>
    where
        P: FnOnce(&S) -> bool,
    {
        let mut sessions = self.sessions.lock().await;
        let dead = sessions
            .get(user_id)
            .and_then(|cell| cell.get())
            .is_some_and(is_dead);
        if dead {
            sessions
                .remove(user_id)
                .and_then(|cell| cell.get().cloned())
        } else {
            None
        }
    }

    /// Take every live session out of the pool, for shutdown.
    pub async fn drain(&self) -> Vec<(String, S)> {
        let mut sessions = self.sessions.lock().await;
        sessions
            .drain()
            .filter_map(|(id, cell)| cell.get().cloned().map(|s| (id, s)))
            .collect()
    }

    /// Number of users with a live session.
    pub async fn len(&self) -> usize {
        let sessions = self.sessions.lock().await;
        sessions.values().filter(|cell| cell.initialized()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_creates_once_then_reuses() {
        let pool: SessionPool<u32> = SessionPool::new();

        let first = pool
            .get_or_create("@alice:example.org", || async { Ok::<_, ()>(7) })
            .await
            .unwrap();
        let second = pool
            .get_or_create("@alice:example.org", || async { Ok::<_, ()>(8) })
            .await
            .unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(second.session, 7);
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn test_failed_factory_is_retried() {
        let pool: SessionPool<u32> = SessionPool::new();

        let err = pool
            .get_or_create("@alice:example.org", || async { Err::<u32, _>("refused") })
            .await;
        assert_eq!(err.unwrap_err(), "refused");
        assert!(pool.get("@alice:example.org").await.is_none());
        assert!(pool.is_empty().await);

        let retry = pool
            .get_or_create("@alice:example.org", || async { Ok::<_, &str>(1) })
            .await
            .unwrap();
        assert!(retry.created);
    }

    #[tokio::test]
    async fn test_remove_if_only_removes_matching() {
        let pool: SessionPool<u32> = SessionPool::new();
        pool.get_or_create("@alice:example.org", || async { Ok::<_, ()>(3) })
            .await
            .unwrap();

        assert!(pool.remove_if("@alice:example.org", |s| *s == 4).await.is_none());
        assert_eq!(pool.len().await, 1);

        assert_eq!(pool.remove_if("@alice:example.org", |s| *s == 3).await, Some(3));
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn test_drain_returns_live_sessions() {
        let pool: SessionPool<u32> = SessionPool::new();
        pool.get_or_create("@a:example.org", || async { Ok::<_, ()>(1) })
            .await
            .unwrap();
        pool.get_or_create("@b:example.org", || async { Ok::<_, ()>(2) })
            .await
            .unwrap();
        let _ = pool
            .get_or_create("@c:example.org", || async { Err::<u32, ()>(()) })
            .await;

        let mut drained = pool.drain().await;
        drained.sort();
        assert_eq!(
            drained,
            vec![("@a:example.org".to_string(), 1), ("@b:example.org".to_string(), 2)]
        );
        assert!(pool.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_deliveries_create_one_session() {
        let pool: Arc<SessionPool<usize>> = Arc::new(SessionPool::new());
        let connects = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let pool = Arc::clone(&pool);
            let connects = Arc::clone(&connects);
            handles.push(tokio::spawn(async move {
                pool.get_or_create("@alice:example.org", || async move {
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    Ok::<_, ()>(connects.fetch_add(1, Ordering::SeqCst))
                })
                .await
                .unwrap()
            }));
        }

        let mut created = 0;
        for handle in handles {
            let checkout = handle.await.unwrap();
            assert_eq!(checkout.session, 0);
            if checkout.created {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        assert_eq!(connects.load(Ordering::SeqCst), 1);
    }
}
