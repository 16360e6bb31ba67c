//! HTTP service wiring for Tally: configuration, authentication and the
//! top-level router.

pub mod auth;
pub mod error;

pub use error::Error;

use std::{path::PathBuf, sync::Arc};

use axum::{Router, middleware, routing::get};
use serde::Deserialize;
use tally_core::store::ReferralStore;
use tally_engine::{Engine, EngineConfig};
use tower_http::trace::TraceLayer;

use auth::AuthConfig;

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` and
/// `TALLY_*` environment variables.
#[derive(Deserialize, Clone)]
pub struct ServerConfig {
  pub host:                     String,
  pub port:                     u16,
  pub store_path:               PathBuf,
  pub auth_username:            String,
  pub auth_password_hash:       String,
  /// How long after a first join a repeated join still counts as the same
  /// one.
  #[serde(default = "default_guard_interval_ms")]
  pub guard_interval_ms:        u64,
  #[serde(default = "default_leaderboard_size")]
  pub default_leaderboard_size: usize,
}

fn default_guard_interval_ms() -> u64 { 1000 }

fn default_leaderboard_size() -> usize { 10 }

impl ServerConfig {
  pub fn engine_config(&self) -> EngineConfig {
    let guard_ms = i64::try_from(self.guard_interval_ms).unwrap_or(i64::MAX);
    EngineConfig {
      guard_interval:           chrono::Duration::milliseconds(guard_ms),
      default_leaderboard_size: self.default_leaderboard_size,
    }
  }

  pub fn auth_config(&self) -> AuthConfig {
    AuthConfig {
      username:      self.auth_username.clone(),
      password_hash: self.auth_password_hash.clone(),
    }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build the service router: the JSON API under `/api` behind Basic auth,
/// plus an unauthenticated `/healthz`.
pub fn router<S>(engine: Arc<Engine<S>>, auth: Arc<AuthConfig>) -> Router
where
  S: ReferralStore + 'static,
{
  let api = tally_api::api_router(engine)
    .layer(middleware::from_fn_with_state(auth, auth::require_auth));

  Router::new()
    .route("/healthz", get(|| async { "ok" }))
    .nest("/api", api)
    .layer(TraceLayer::new_for_http())
}

// ─── Integration tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;

  use argon2::{Argon2, PasswordHasher, password_hash::SaltString};
  use axum::{
    body::Body,
    http::{Request, StatusCode, header},
  };
  use base64::Engine as _;
  use base64::engine::general_purpose::STANDARD as B64;
  use rand_core::OsRng;
  use tally_store_sqlite::SqliteStore;
  use tower::ServiceExt as _;

  async fn app(password: &str) -> Router {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let salt  = SaltString::generate(&mut OsRng);
    let hash  = Argon2::default()
      .hash_password(password.as_bytes(), &salt)
      .unwrap()
      .to_string();
    let engine = Arc::new(Engine::new(store, EngineConfig::default()));
    router(engine, Arc::new(AuthConfig { username: "adapter".into(), password_hash: hash }))
  }

  fn auth_header(user: &str, pass: &str) -> String {
    format!("Basic {}", B64.encode(format!("{user}:{pass}")))
  }

  #[tokio::test]
  async fn healthz_needs_no_credentials() {
    let app  = app("secret").await;
    let req  = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
  }

  #[tokio::test]
  async fn api_requires_credentials() {
    let app  = app("secret").await;
    let req  = Request::builder().uri("/api/users/1").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(resp.headers().contains_key(header::WWW_AUTHENTICATE));
  }

  #[tokio::test]
  async fn authenticated_request_reaches_api() {
    let app = app("secret").await;
    let req = Request::builder()
      .method("POST")
      .uri("/api/users")
      .header(header::AUTHORIZATION, auth_header("adapter", "secret"))
      .header(header::CONTENT_TYPE, "application/json")
      .body(Body::from(r#"{"user_id":42,"first_name":"Ann"}"#))
      .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
    let user: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(user["user_id"], 42);
  }

  #[test]
  fn config_defaults_apply() {
    let cfg: ServerConfig = config::Config::builder()
      .set_override("host", "127.0.0.1").unwrap()
      .set_override("port", 8080).unwrap()
      .set_override("store_path", "/tmp/tally.db").unwrap()
      .set_override("auth_username", "adapter").unwrap()
      .set_override("auth_password_hash", "x").unwrap()
      .build()
      .unwrap()
      .try_deserialize()
      .unwrap();
    let engine = cfg.engine_config();
    assert_eq!(engine.guard_interval, chrono::Duration::seconds(1));
    assert_eq!(engine.default_leaderboard_size, 10);
  }
}
