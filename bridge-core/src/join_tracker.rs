// ABOUTME: Tracks which IRC-origin puppets have already joined the bridged Matrix room
// ABOUTME: Guarantees a single join call per identity, even when messages race each other

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

/// Process-lifetime set of join records keyed by Matrix user ID.
///
/// Each identity gets a cell that is initialised by exactly one join call.
/// Concurrent callers for the same identity wait on that cell, so no message
/// for a puppet is sent before its join call has returned.
///
/// The record is kept even when the join fails, so a puppet whose first join
/// was refused is never joined again for the life of the process. The cell
/// remembers the result so later send failures can be attributed to it.
#[derive(Default)]
pub struct JoinTracker {
    joins: Mutex<HashMap<String, Arc<OnceCell<bool>>>>,
}

impl JoinTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `join_fn(user_id)` the first time `user_id` is seen.
    ///
    /// `join_fn` resolves to whether the join succeeded. Returns `true` if
    /// this call performed the join. A failed join still leaves the record in
    /// place; records are never removed.
    pub async fn ensure_joined<F, Fut>(&self, user_id: &str, join_fn: F) -> bool
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = bool>,
    {
        let cell = {
            let mut joins = self.joins.lock().await;
            Arc::clone(joins.entry(user_id.to_string()).or_default())
        };

        let mut performed = false;
        cell.get_or_init(|| {
            performed = true;
            join_fn(user_id.to_string())
        })
        .await;
        performed
    }

    /// Whether a join has completed for `user_id`.
    pub async fn is_joined(&self, user_id: &str) -> bool {
        let joins = self.joins.lock().await;
        joins.get(user_id).is_some_and(|cell| cell.initialized())
    }

    /// Whether the recorded join for `user_id` was refused.
    pub async fn join_failed(&self, user_id: &str) -> bool {
        let joins = self.joins.lock().await;
        joins
            .get(user_id)
            .is_some_and(|cell| cell.get() == Some(&false))
    }

    pub async fn len(&self) -> usize {
        self.joins.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.joins.lock().await.is_empty()
    }
}
