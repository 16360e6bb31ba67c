//! JSON REST API for Tally.
//!
//! Exposes an axum [`Router`] backed by an [`Engine`] over any
//! [`tally_core::store::ReferralStore`]. Auth, TLS, and transport concerns
//! are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", tally_api::api_router(engine.clone()))
//! ```

pub mod error;
pub mod giveaways;
pub mod groups;
pub mod leaderboard;
pub mod referrals;
pub mod users;


use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post, put},
};
use tally_core::store::ReferralStore;
use tally_engine::Engine;

pub use error::ApiError;

/// Build a fully-materialised API router for `engine`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(engine: Arc<Engine<S>>) -> Router<()>
where
  S: ReferralStore + 'static,
{
  Router::new()
    // Users
    .route("/users", post(users::upsert::<S>))
    .route("/users/{id}", get(users::get_one::<S>))
    .route("/users/{id}/token", post(users::token::<S>))
    // Groups
    .route("/groups", post(groups::upsert::<S>))
    .route("/groups/{id}", get(groups::get_one::<S>))
    .route("/groups/{id}/settings", put(groups::update_settings::<S>))
    .route("/groups/{id}/invites", post(groups::invite::<S>))
    .route("/groups/{id}/joins", post(groups::join::<S>))
    // Referrals
    .route("/referrals", get(referrals::history::<S>).post(referrals::attempt::<S>))
    .route("/referrals/start", post(referrals::start::<S>))
    // Leaderboard
    .route("/leaderboard", get(leaderboard::handler::<S>))
    // Giveaways
    .route("/groups/{id}/giveaways", post(giveaways::create::<S>))
    .route("/groups/{id}/giveaway", get(giveaways::active::<S>))
    .route("/giveaways/{id}", get(giveaways::get_one::<S>))
    .route("/giveaways/{id}/end", post(giveaways::end::<S>))
    .route("/giveaways/{id}/replay", post(giveaways::replay::<S>))
    .route("/giveaways/{id}/progress/{user}", get(giveaways::progress::<S>))
    .with_state(engine)
}
