//! Endpoints served behind the authorization resolver.

use std::collections::BTreeMap;

use axum::{Extension, Json, Router, routing::get};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    AppState,
    auth::{Authorized, IdentitySource},
    authz::RoleRequirement,
    middleware::{RoleGate, authorize_middleware, role_gate_middleware},
};

/// `/api` routes. Every request must resolve to an identity.
pub fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/me", get(me))
        .route("/me/settings", get(settings))
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            authorize_middleware,
        ))
}

/// `/admin` routes. Authorized, then gated on `Root` or `SystemAdministrator`.
pub fn admin_routes(state: AppState) -> Router<AppState> {
    let gate = RoleGate::new(RoleRequirement::admin(), state.catalog.clone());
    Router::new()
        .route("/environment", get(environment))
        .route_layer(axum::middleware::from_fn_with_state(
            gate,
            role_gate_middleware,
        ))
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            authorize_middleware,
        ))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MeResponse {
    pub user_id: String,
    pub user_name: String,
    pub env_id: String,
    pub profile: String,
    pub roles: Vec<String>,
    pub locale: String,
    pub source: IdentitySource,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SettingsResponse {
    pub settings: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// `GET /api/me`
#[tracing::instrument(name = "api.me", skip_all)]
pub async fn me(Extension(authorized): Extension<Authorized>) -> Json<MeResponse> {
    let identity = &authorized.identity;
    Json(MeResponse {
        user_id: identity.user_id.to_string(),
        user_name: identity.user_name.clone(),
        env_id: authorized.environment.id.to_string(),
        profile: identity.profile.name.clone(),
        roles: identity.roles.iter().cloned().collect(),
        locale: identity.locale.clone(),
        source: authorized.source,
    })
}

/// `GET /api/me/settings`
///
/// Cascade settings materialized for the caller.
#[tracing::instrument(name = "api.me.settings", skip_all)]
pub async fn settings(Extension(authorized): Extension<Authorized>) -> Json<SettingsResponse> {
    Json(SettingsResponse {
        settings: authorized
            .identity
            .cascade_settings
            .clone()
            .unwrap_or_default(),
    })
}

/// `GET /admin/environment`
#[tracing::instrument(name = "admin.environment", skip_all)]
pub async fn environment(Extension(authorized): Extension<Authorized>) -> Json<EnvironmentInfo> {
    let env = &authorized.environment;
    Json(EnvironmentInfo {
        id: env.id.to_string(),
        name: env.name.clone(),
        created_at: env.created_at,
    })
}
