//! Environment resolution.
//!
//! Every request runs against exactly one environment. It is named explicitly
//! by the caller or taken from the session's sticky environment.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::{
    auth::{AuthError, SessionContext},
    models::{Environment, Kid},
};

pub type EnvStoreResult<T> = Result<T, EnvStoreError>;

#[derive(Debug, thiserror::Error)]
pub enum EnvStoreError {
    #[error("Environment store unavailable: {0}")]
    Unavailable(String),
}

/// Lookup of environments by ID.
#[async_trait]
pub trait EnvironmentStore: Send + Sync {
    async fn get(&self, id: &Kid) -> EnvStoreResult<Option<Arc<Environment>>>;

    async fn insert(&self, env: Environment) -> EnvStoreResult<Arc<Environment>>;

    async fn remove(&self, id: &Kid) -> EnvStoreResult<bool>;
}

/// Process-wide environment cache keyed by ID.
#[derive(Default)]
pub struct MemoryEnvironmentStore {
    envs: DashMap<Kid, Arc<Environment>>,
}

impl MemoryEnvironmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.envs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.envs.is_empty()
    }
}

#[async_trait]
impl EnvironmentStore for MemoryEnvironmentStore {
    async fn get(&self, id: &Kid) -> EnvStoreResult<Option<Arc<Environment>>> {
        Ok(self.envs.get(id).map(|e| Arc::clone(e.value())))
    }

    async fn insert(&self, env: Environment) -> EnvStoreResult<Arc<Environment>> {
        let env = Arc::new(env);
        self.envs.insert(env.id.clone(), Arc::clone(&env));
        Ok(env)
    }

    async fn remove(&self, id: &Kid) -> EnvStoreResult<bool> {
        Ok(self.envs.remove(id).is_some())
    }
}

/// Maps an explicit or session-implicit environment reference to an environment.
#[derive(Clone)]
pub struct EnvironmentResolver {
    store: Arc<dyn EnvironmentStore>,
}

impl EnvironmentResolver {
    pub fn new(store: Arc<dyn EnvironmentStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn EnvironmentStore> {
        &self.store
    }

    /// Resolve the environment of a request.
    ///
    /// A blank explicit ID counts as absent. Any other value is parsed as
    /// given, so surrounding whitespace makes it malformed. A well-formed ID
    /// that names no environment fails closed instead of falling back to the
    /// session.
    pub async fn resolve(
        &self,
        explicit: Option<&str>,
        session: &SessionContext,
    ) -> Result<Arc<Environment>, AuthError> {
        match explicit.filter(|s| !s.trim().is_empty()) {
            Some(raw) => {
                let id = Kid::parse(raw).map_err(|e| {
                    tracing::debug!(raw, error = %e, "Rejected malformed environment ID");
                    AuthError::MalformedReference {
                        raw: raw.to_string(),
                    }
                })?;
                self.lookup(&id).await?.ok_or_else(|| {
                    tracing::debug!(env_id = %id, "Environment not found");
                    AuthError::MissingEnvironment {
                        requested: Some(raw.to_string()),
                    }
                })
            }
            None => {
                let Some(id) = session.env_id() else {
                    return Err(AuthError::MissingEnvironment { requested: None });
                };
                self.lookup(id).await?.ok_or_else(|| {
                    tracing::debug!(env_id = %id, "Session environment no longer exists");
                    AuthError::MissingEnvironment { requested: None }
                })
            }
        }
    }

    async fn lookup(&self, id: &Kid) -> Result<Option<Arc<Environment>>, AuthError> {
        self.store.get(id).await.map_err(|e| {
            tracing::error!(env_id = %id, error = %e, "Environment lookup failed");
            AuthError::Unauthenticated
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::rstest;

    use super::*;
    use crate::auth::Session;

    const ENV_ID: &str = "0010000000001";

    async fn resolver() -> EnvironmentResolver {
        let store = MemoryEnvironmentStore::new();
        store
            .insert(Environment::new(Kid::parse(ENV_ID).unwrap(), "dev"))
            .await
            .unwrap();
        EnvironmentResolver::new(Arc::new(store))
    }

    fn session_with_env(env_id: &str) -> SessionContext {
        let mut session = Session::new(Duration::from_secs(60));
        session.env_id = Some(Kid::parse(env_id).unwrap());
        SessionContext::new(session)
    }

    struct FailingStore;

    #[async_trait]
    impl EnvironmentStore for FailingStore {
        async fn get(&self, _id: &Kid) -> EnvStoreResult<Option<Arc<Environment>>> {
            Err(EnvStoreError::Unavailable("connection refused".into()))
        }

        async fn insert(&self, _env: Environment) -> EnvStoreResult<Arc<Environment>> {
            Err(EnvStoreError::Unavailable("connection refused".into()))
        }

        async fn remove(&self, _id: &Kid) -> EnvStoreResult<bool> {
            Err(EnvStoreError::Unavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_explicit_id() {
        let env = resolver()
            .await
            .resolve(Some(ENV_ID), &SessionContext::anonymous())
            .await
            .unwrap();
        assert_eq!(env.id.as_str(), ENV_ID);
        assert_eq!(env.name, "dev");
    }

    #[rstest]
    #[case("001abc")]
    #[case("0010000000001x")]
    #[case("001-000000001")]
    #[case(" 0010000000001 ")]
    #[case("0010000000001\n")]
    #[tokio::test]
    async fn test_malformed_explicit_id(#[case] raw: &str) {
        let err = resolver()
            .await
            .resolve(Some(raw), &session_with_env(ENV_ID))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            AuthError::MalformedReference {
                raw: raw.to_string()
            }
        );
        assert!(err.to_string().contains(raw));
    }

    #[tokio::test]
    async fn test_unknown_explicit_id_fails_closed() {
        // The session environment exists but must not be used as a fallback.
        let err = resolver()
            .await
            .resolve(Some("0010000000009"), &session_with_env(ENV_ID))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MissingEnvironment { requested: Some(_) }));
        assert_eq!(err.status(), http::StatusCode::BAD_REQUEST);
    }

    #[rstest]
    #[case(None)]
    #[case(Some(""))]
    #[case(Some("   "))]
    #[tokio::test]
    async fn test_absent_id_uses_session(#[case] explicit: Option<&str>) {
        let env = resolver()
            .await
            .resolve(explicit, &session_with_env(ENV_ID))
            .await
            .unwrap();
        assert_eq!(env.id.as_str(), ENV_ID);
    }

    #[tokio::test]
    async fn test_absent_everywhere() {
        let err = resolver()
            .await
            .resolve(None, &SessionContext::anonymous())
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::MissingEnvironment { requested: None });
        assert!(err.to_string().starts_with("Environment not specified"));
    }

    #[tokio::test]
    async fn test_stale_session_environment() {
        let err = resolver()
            .await
            .resolve(None, &session_with_env("0010000000002"))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::MissingEnvironment { requested: None });
    }

    #[tokio::test]
    async fn test_store_failure_collapses_to_unauthenticated() {
        let resolver = EnvironmentResolver::new(Arc::new(FailingStore));
        let err = resolver
            .resolve(Some(ENV_ID), &SessionContext::anonymous())
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::Unauthenticated);
    }

    #[tokio::test]
    async fn test_memory_store_remove() {
        let store = MemoryEnvironmentStore::new();
        let id = Kid::parse(ENV_ID).unwrap();
        store.insert(Environment::new(id.clone(), "dev")).await.unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.remove(&id).await.unwrap());
        assert!(store.get(&id).await.unwrap().is_none());
        assert!(store.is_empty());
    }
}
