//! Process-local settlement timers.
//!
//! Timers are not durable. The persisted `end_at` plus the startup recovery
//! sweep in [`GiveawayManager::recover`](crate::giveaway::GiveawayManager::recover)
//! cover restarts; a timer firing for an already-ended giveaway is a no-op.

use std::{
  collections::HashMap,
  future::Future,
  sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, Utc};
use tokio::task::AbortHandle;
use uuid::Uuid;

#[derive(Clone, Default)]
pub struct SettlementTimers {
  handles: Arc<Mutex<HashMap<Uuid, AbortHandle>>>,
}

impl SettlementTimers {
  fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, AbortHandle>> {
    self.handles.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Run `settle` once `deadline` has passed, replacing any timer already
  /// armed for `giveaway_id`.
  pub fn arm<F>(&self, giveaway_id: Uuid, deadline: DateTime<Utc>, settle: F)
  where
    F: Future<Output = ()> + Send + 'static,
  {
    // Held across the spawn so the task cannot forget itself before it is
    // registered.
    let mut handles = self.lock();
    let timers = self.clone();
    let task = tokio::spawn(async move {
      let wait = (deadline - Utc::now()).to_std().unwrap_or_default();
      tokio::time::sleep(wait).await;
      // Deregister before settling so `disarm` from the settlement path
      // cannot abort this task mid-write.
      timers.lock().remove(&giveaway_id);
      settle.await;
    });
    if let Some(previous) = handles.insert(giveaway_id, task.abort_handle()) {
      previous.abort();
    }
  }

  /// Cancel a pending timer. Returns `true` if one was armed.
  pub fn disarm(&self, giveaway_id: Uuid) -> bool {
    match self.lock().remove(&giveaway_id) {
      Some(handle) => {
        handle.abort();
        true
      }
      None => false,
    }
  }

  pub fn is_armed(&self, giveaway_id: Uuid) -> bool {
    self.lock().contains_key(&giveaway_id)
  }

  pub fn armed(&self) -> usize { self.lock().len() }
}
