//! [`GiveawayManager`]: contest lifecycle, progress projection and
//! scheduled settlement.
//!
//! Per group: `NoActiveGiveaway → Active → Ended`. `Ended` is terminal. The
//! only writer of the `Active → Ended` transition is
//! [`ReferralStore::settle_giveaway`], a compare-and-set; whichever of the
//! deadline timer or a manual `end` gets there second observes
//! [`SettleOutcome::AlreadyEnded`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tally_core::{
  giveaway::{Deadline, Giveaway, GiveawaySettings, Progress},
  referral::ReferralFilter,
  store::{CreateOutcome, ReferralStore, SettleOutcome},
  GroupId, UserId,
};
use uuid::Uuid;

use crate::{scheduler::SettlementTimers, Error, Result};

/// What the startup sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Recovery {
  /// Overdue giveaways ended by the sweep.
  pub settled: Vec<Uuid>,
  /// Still-running giveaways whose timers were re-armed.
  pub rearmed: Vec<Uuid>,
}

pub struct GiveawayManager<S> {
  store:  Arc<S>,
  timers: SettlementTimers,
}

impl<S> Clone for GiveawayManager<S> {
  fn clone(&self) -> Self {
    Self { store: Arc::clone(&self.store), timers: self.timers.clone() }
  }
}

impl<S: ReferralStore + 'static> GiveawayManager<S> {
  pub fn new(store: Arc<S>) -> Self {
    Self { store, timers: SettlementTimers::default() }
  }

  pub fn timers(&self) -> &SettlementTimers { &self.timers }

  // ── Lifecycle ─────────────────────────────────────────────────────────

  /// Start a giveaway in `group_id` and arm its settlement timer.
  pub async fn create(
    &self,
    group_id: GroupId,
    creator_id: UserId,
    settings: GiveawaySettings,
    deadline: Deadline,
  ) -> Result<Giveaway> {
    settings.validate()?;
    self
      .store
      .get_group(group_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::GroupNotFound(group_id))?;
    let now = tally_core::now();
    let end_at = deadline.resolve(now)?;

    let outcome = self
      .store
      .create_giveaway(Giveaway::new(group_id, creator_id, settings, now, end_at))
      .await
      .map_err(Error::store)?;

    let giveaway = match outcome {
      CreateOutcome::Created(giveaway) => giveaway,
      CreateOutcome::GroupBusy(active) => {
        return Err(Error::GiveawayAlreadyActive { group_id, active });
      }
    };

    tracing::info!(
      group_id,
      giveaway_id = %giveaway.giveaway_id,
      end_at = %giveaway.end_at,
      "giveaway started"
    );
    self.schedule(&giveaway);
    Ok(giveaway)
  }

  /// End a giveaway. Idempotent: an ended giveaway is returned as stored,
  /// without any write.
  pub async fn end(&self, group_id: GroupId, giveaway_id: Uuid) -> Result<SettleOutcome> {
    let giveaway = self.get(giveaway_id).await?;
    if giveaway.group_id != group_id {
      return Err(Error::GiveawayNotFound(giveaway_id));
    }
    if !giveaway.active {
      return Ok(SettleOutcome::AlreadyEnded(giveaway));
    }

    let outcome = self
      .store
      .settle_giveaway(giveaway_id, tally_core::now())
      .await
      .map_err(Error::store)?;

    match &outcome {
      SettleOutcome::Settled(g) => {
        self.timers.disarm(giveaway_id);
        tracing::info!(group_id, %giveaway_id, winners = ?g.winners, "giveaway settled");
      }
      SettleOutcome::AlreadyEnded(_) => {
        tracing::debug!(group_id, %giveaway_id, "giveaway already settled by a concurrent call");
      }
    }
    Ok(outcome)
  }

  /// Arm the settlement timer for an active giveaway.
  fn schedule(&self, giveaway: &Giveaway) {
    let manager = self.clone();
    let group_id = giveaway.group_id;
    let giveaway_id = giveaway.giveaway_id;
    self.timers.arm(giveaway_id, giveaway.end_at, async move {
      match manager.end(group_id, giveaway_id).await {
        Ok(SettleOutcome::Settled(_)) => {
          tracing::info!(group_id, %giveaway_id, "giveaway deadline reached");
        }
        Ok(SettleOutcome::AlreadyEnded(_)) => {}
        Err(e) => {
          tracing::error!(group_id, %giveaway_id, error = %e, "scheduled settlement failed");
        }
      }
    });
  }

  /// Startup sweep: end every active giveaway whose deadline has passed and
  /// re-arm timers for the rest.
  pub async fn recover(&self) -> Result<Recovery> {
    let now = tally_core::now();
    let active = self.store.list_active_giveaways().await.map_err(Error::store)?;

    let mut recovery = Recovery::default();
    for giveaway in active {
      if giveaway.is_overdue(now) {
        self.end(giveaway.group_id, giveaway.giveaway_id).await?;
        recovery.settled.push(giveaway.giveaway_id);
      } else {
        self.schedule(&giveaway);
        recovery.rearmed.push(giveaway.giveaway_id);
      }
    }

    tracing::info!(
      settled = recovery.settled.len(),
      rearmed = recovery.rearmed.len(),
      "giveaway recovery sweep complete"
    );
    Ok(recovery)
  }

  // ── Progress projection ───────────────────────────────────────────────

  /// Recount `referrer_id`'s valid referrals inside the group's active
  /// giveaway window and store the result. `None` if no giveaway is active.
  pub async fn refresh_progress(
    &self,
    group_id: GroupId,
    referrer_id: UserId,
  ) -> Result<Option<Progress>> {
    // Referrals into groups that were never registered have nothing to
    // project onto.
    let group = self.store.get_group(group_id).await.map_err(Error::store)?;
    let Some(giveaway) = self.load_active(group.and_then(|g| g.active_giveaway_id)).await? else {
      return Ok(None);
    };

    let count = self.count_in_window(&giveaway, referrer_id, tally_core::now()).await?;
    let written = self
      .store
      .record_progress(giveaway.giveaway_id, referrer_id, count)
      .await
      .map_err(Error::store)?;
    if !written {
      // Settled between the lookup and the write; the final counts stand.
      return Ok(None);
    }

    Ok(Some(Progress {
      user_id: referrer_id,
      count,
      target: giveaway.settings.target_referrals,
    }))
  }

  /// Rebuild every participant count of an active giveaway from the ledger.
  pub async fn replay_progress(&self, giveaway_id: Uuid) -> Result<Giveaway> {
    let giveaway = self.get(giveaway_id).await?;
    if !giveaway.active {
      return Ok(giveaway);
    }

    let now = tally_core::now();
    let filter = ReferralFilter::valid()
      .in_group(giveaway.group_id)
      .between(giveaway.started_at, giveaway.window_end(now));
    let standings = self.store.count_by_referrer(&filter).await.map_err(Error::store)?;
    for standing in &standings {
      self
        .store
        .record_progress(giveaway_id, standing.user_id, standing.count)
        .await
        .map_err(Error::store)?;
    }

    tracing::debug!(%giveaway_id, participants = standings.len(), "progress replayed");
    self.get(giveaway_id).await
  }

  async fn count_in_window(
    &self,
    giveaway: &Giveaway,
    referrer_id: UserId,
    now: DateTime<Utc>,
  ) -> Result<u32> {
    let filter = ReferralFilter::valid()
      .in_group(giveaway.group_id)
      .by_referrer(referrer_id)
      .between(giveaway.started_at, giveaway.window_end(now));
    let standings = self.store.count_by_referrer(&filter).await.map_err(Error::store)?;
    Ok(standings.first().map_or(0, |s| s.count))
  }

  // ── Reads ─────────────────────────────────────────────────────────────

  pub async fn get(&self, giveaway_id: Uuid) -> Result<Giveaway> {
    self
      .store
      .get_giveaway(giveaway_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::GiveawayNotFound(giveaway_id))
  }

  /// The group's running giveaway, if any.
  pub async fn active_for(&self, group_id: GroupId) -> Result<Option<Giveaway>> {
    let group = self
      .store
      .get_group(group_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::GroupNotFound(group_id))?;
    self.load_active(group.active_giveaway_id).await
  }

  async fn load_active(&self, giveaway_id: Option<Uuid>) -> Result<Option<Giveaway>> {
    let Some(giveaway_id) = giveaway_id else {
      return Ok(None);
    };
    let giveaway = self.store.get_giveaway(giveaway_id).await.map_err(Error::store)?;
    Ok(giveaway.filter(|g| g.active))
  }

  /// A referrer's standing in a giveaway as last projected.
  pub async fn progress(&self, giveaway_id: Uuid, user_id: UserId) -> Result<Progress> {
    Ok(self.get(giveaway_id).await?.progress(user_id))
  }
}
