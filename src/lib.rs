//! Request authorization for Kommet.
//!
//! Every privileged request is resolved to an environment and an identity
//! before any handler runs. The identity comes from the browser session or,
//! failing that, from an OAuth2 bearer token. Operations may additionally be
//! gated on roles.

pub mod auth;
pub mod authz;
pub mod config;
pub mod env;
pub mod i18n;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod response;
pub mod routes;
pub mod services;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_cookies::CookieManagerLayer;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::{
    auth::{
        AuthorizationResolver, MemorySessionStore, MemoryTokenStore, SessionStore, TokenStore,
    },
    config::{EnvironmentSeed, GateConfig},
    env::{EnvStoreError, EnvironmentResolver, EnvironmentStore, MemoryEnvironmentStore},
    i18n::MessageCatalog,
    models::{Environment, Profile},
    services::{
        MemoryCascadeSettings, MemoryPermissionService, MemoryUserDirectory, ProfileGrants,
        SettingValue, UserRecord,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GateConfig>,
    pub resolver: AuthorizationResolver,
    pub sessions: Arc<dyn SessionStore>,
    pub catalog: Arc<MessageCatalog>,
}

/// Failure to assemble the application state.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Invalid seed data: {0}")]
    Seed(String),

    #[error(transparent)]
    EnvStore(#[from] EnvStoreError),
}

impl AppState {
    /// Build in-memory stores and populate them from `[seed]`.
    pub async fn from_config(config: GateConfig) -> Result<Self, StartupError> {
        let environments = Arc::new(MemoryEnvironmentStore::new());
        let users = Arc::new(MemoryUserDirectory::new());
        let permissions = Arc::new(MemoryPermissionService::new());
        let settings = Arc::new(MemoryCascadeSettings::new());

        for seed in &config.seed.environments {
            seed_environment(seed, environments.as_ref(), &users, &permissions, &settings).await?;
        }

        let mut catalog = MessageCatalog::new();
        for (locale, entries) in &config.i18n.messages {
            catalog.extend(locale, entries);
        }

        let tokens: Arc<dyn TokenStore> = Arc::new(MemoryTokenStore::new());
        let resolver = AuthorizationResolver::new(
            EnvironmentResolver::new(environments),
            tokens,
            users,
            permissions,
            settings,
        );

        tracing::info!(
            environments = config.seed.environments.len(),
            "Application state initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            resolver,
            sessions: Arc::new(MemorySessionStore::new()),
            catalog: Arc::new(catalog),
        })
    }
}

impl AppState {
    /// Drop expired access tokens and sessions. Failures are logged.
    pub async fn purge_expired(&self) -> (usize, usize) {
        let tokens = self.resolver.tokens().cleanup().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Token cleanup failed");
            0
        });
        let sessions = self.sessions.cleanup().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Session cleanup failed");
            0
        });
        if tokens > 0 || sessions > 0 {
            tracing::debug!(tokens, sessions, "Purged expired credentials");
        }
        (tokens, sessions)
    }

    /// Run [`purge_expired`](Self::purge_expired) every
    /// `auth.cleanup_interval_secs` until the task is aborted.
    pub fn spawn_cleanup(&self) -> tokio::task::JoinHandle<()> {
        let state = self.clone();
        let period = std::time::Duration::from_secs(self.config.auth.cleanup_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                state.purge_expired().await;
            }
        })
    }
}

async fn seed_environment(
    seed: &EnvironmentSeed,
    environments: &dyn EnvironmentStore,
    users: &MemoryUserDirectory,
    permissions: &MemoryPermissionService,
    settings: &MemoryCascadeSettings,
) -> Result<(), StartupError> {
    environments
        .insert(Environment::new(seed.id.clone(), seed.name.clone()))
        .await?;

    for profile in &seed.profiles {
        permissions.grant(
            seed.id.clone(),
            profile.id.clone(),
            ProfileGrants {
                types: profile.types.clone(),
                actions: profile.actions.clone(),
            },
        );
    }

    for user in &seed.users {
        let profile = seed
            .profiles
            .iter()
            .find(|p| p.id == user.profile)
            .ok_or_else(|| {
                StartupError::Seed(format!(
                    "user '{}' references unknown profile {}",
                    user.user_name, user.profile
                ))
            })?;
        let digest = user.password_digest().ok_or_else(|| {
            StartupError::Seed(format!(
                "user '{}' needs exactly one of password, password_sha256",
                user.user_name
            ))
        })?;

        let record = UserRecord {
            id: user.id.clone(),
            user_name: user.user_name.clone(),
            password_digest: digest,
            profile: Profile::new(profile.id.clone(), profile.name.clone()),
            roles: user.roles.clone(),
            group_ids: user.groups.clone(),
            locale: user
                .locale
                .clone()
                .unwrap_or_else(|| auth::DEFAULT_LOCALE.to_string()),
            active: user.active,
        };
        users.insert(seed.id.clone(), record);
    }

    for setting in &seed.settings {
        let scope = setting.scope().map_err(StartupError::Seed)?;
        settings.set(
            seed.id.clone(),
            SettingValue::new(setting.key.clone(), setting.value.clone(), scope),
        );
    }

    tracing::debug!(
        env_id = %seed.id,
        profiles = seed.profiles.len(),
        users = seed.users.len(),
        settings = seed.settings.len(),
        "Seeded environment"
    );
    Ok(())
}

/// Assemble the router.
///
/// Public endpoints: `/health`, `/oauth/token`, `/auth/login`, `/auth/logout`.
/// Everything under `/api` goes through the authorization resolver, and
/// `/admin` additionally through the admin role gate.
pub fn build_app(state: AppState) -> Router {
    let config = state.config.clone();

    let mut app = Router::new().route("/health", get(routes::health::health_check));

    if config.observability.metrics.enabled {
        app = app.route("/metrics", get(routes::health::metrics));
    }

    app.route("/oauth/token", post(routes::oauth::token))
        .nest("/auth", routes::auth::router(state.clone()))
        .nest("/api", routes::me::api_routes(state.clone()))
        .nest("/admin", routes::me::admin_routes(state.clone()))
        .layer(CookieManagerLayer::new())
        .layer(RequestBodyLimitLayer::new(config.server.body_limit_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .with_state(state)
}
