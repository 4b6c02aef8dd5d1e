//! Per-request authorization.
//!
//! [`AuthorizationResolver::prepare_request`] is the single choke point every
//! privileged handler goes through. It produces an environment and an identity
//! together, or a failure carrying a 400 or 403. Steps run strictly in order
//! and stop at the first failure:
//!
//! 1. resolve the environment (explicit ID, else the session's)
//! 2. take the session identity if there is one; an identity scoped to
//!    another environment fails with `Unauthenticated`
//! 3. otherwise look up the bearer token, load its owner in the resolved
//!    environment and materialize permissions and cascade settings
//! 4. fail with `Unauthenticated` if neither path produced an identity

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{AuthError, Identity, SessionContext, TokenStore};
use crate::{
    env::EnvironmentResolver,
    models::Environment,
    observability::metrics,
    services::{CascadeSettingsService, DirectoryError, PermissionService, UserDirectory},
};

/// How the identity of an authorized request was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    Session,
    BearerToken,
}

impl IdentitySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::BearerToken => "bearer_token",
        }
    }
}

/// A request whose environment and identity were both resolved.
#[derive(Debug, Clone)]
pub struct Authorized {
    pub identity: Arc<Identity>,
    pub environment: Arc<Environment>,
    pub source: IdentitySource,
}

pub type AuthorizationResult = Result<Authorized, AuthError>;

#[derive(Clone)]
pub struct AuthorizationResolver {
    environments: EnvironmentResolver,
    tokens: Arc<dyn TokenStore>,
    users: Arc<dyn UserDirectory>,
    permissions: Arc<dyn PermissionService>,
    settings: Arc<dyn CascadeSettingsService>,
}

impl AuthorizationResolver {
    pub fn new(
        environments: EnvironmentResolver,
        tokens: Arc<dyn TokenStore>,
        users: Arc<dyn UserDirectory>,
        permissions: Arc<dyn PermissionService>,
        settings: Arc<dyn CascadeSettingsService>,
    ) -> Self {
        Self {
            environments,
            tokens,
            users,
            permissions,
            settings,
        }
    }

    pub fn environments(&self) -> &EnvironmentResolver {
        &self.environments
    }

    pub fn users(&self) -> &Arc<dyn UserDirectory> {
        &self.users
    }

    pub fn tokens(&self) -> &Arc<dyn TokenStore> {
        &self.tokens
    }

    /// Resolve `{identity, environment}` for one request.
    ///
    /// A blank bearer token counts as absent. Store and directory faults are
    /// logged and reported as `Unauthenticated`.
    #[tracing::instrument(
        name = "auth.prepare_request",
        skip_all,
        fields(explicit_env = explicit_env_id, has_token = bearer_token.is_some())
    )]
    pub async fn prepare_request(
        &self,
        explicit_env_id: Option<&str>,
        bearer_token: Option<&str>,
        session: &SessionContext,
    ) -> AuthorizationResult {
        let result = self.resolve(explicit_env_id, bearer_token, session).await;
        match &result {
            Ok(authorized) => {
                metrics::record_auth_attempt(authorized.source.as_str(), true);
                tracing::debug!(
                    user_id = %authorized.identity.user_id,
                    env_id = %authorized.environment.id,
                    source = authorized.source.as_str(),
                    "Request authorized"
                );
            }
            Err(e) => {
                metrics::record_auth_failure(e.code());
                tracing::debug!(code = e.code(), status = e.status().as_u16(), "Request not authorized");
            }
        }
        result
    }

    async fn resolve(
        &self,
        explicit_env_id: Option<&str>,
        bearer_token: Option<&str>,
        session: &SessionContext,
    ) -> AuthorizationResult {
        let environment = self.environments.resolve(explicit_env_id, session).await?;

        if let Some(identity) = session.identity() {
            if identity.env_id != environment.id {
                tracing::debug!(
                    user_id = %identity.user_id,
                    identity_env = %identity.env_id,
                    env_id = %environment.id,
                    "Session identity belongs to another environment"
                );
                return Err(AuthError::Unauthenticated);
            }
            return Ok(Authorized {
                identity: Arc::new(identity.clone()),
                environment,
                source: IdentitySource::Session,
            });
        }

        let Some(token) = bearer_token.map(str::trim).filter(|t| !t.is_empty()) else {
            return Err(AuthError::Unauthenticated);
        };

        match self.identity_from_token(token, &environment).await {
            Some(identity) => Ok(Authorized {
                identity: Arc::new(identity),
                environment,
                source: IdentitySource::BearerToken,
            }),
            None => {
                metrics::record_auth_attempt(IdentitySource::BearerToken.as_str(), false);
                Err(AuthError::Unauthenticated)
            }
        }
    }

    /// Token path. Every miss or fault yields `None`; the caller reports a
    /// uniform `Unauthenticated` so responses never tell which part was wrong.
    async fn identity_from_token(&self, token: &str, env: &Environment) -> Option<Identity> {
        let access_token = match self.tokens.get_token(token).await {
            Ok(Some(t)) => t,
            Ok(None) => {
                tracing::debug!("Bearer token unknown or expired");
                return None;
            }
            Err(e) => {
                tracing::error!(error = %e, "Token store lookup failed");
                return None;
            }
        };

        if access_token.env_id != env.id {
            tracing::debug!(
                token_env = %access_token.env_id,
                env_id = %env.id,
                "Bearer token was issued for another environment"
            );
            return None;
        }

        let mut identity = match self.users.load_identity(&access_token.user_id, env).await {
            Ok(Some(identity)) => identity,
            Ok(None) => {
                tracing::warn!(user_id = %access_token.user_id, env_id = %env.id, "Token owner not found");
                return None;
            }
            Err(e) => {
                tracing::error!(user_id = %access_token.user_id, error = %e, "Loading token owner failed");
                return None;
            }
        };

        if let Err(e) = self.materialize(&mut identity, env).await {
            tracing::error!(user_id = %identity.user_id, error = %e, "Materializing permissions failed");
            return None;
        }
        Some(identity)
    }

    /// Compute permissions and cascade settings and store them on the identity.
    pub async fn materialize(
        &self,
        identity: &mut Identity,
        env: &Environment,
    ) -> Result<(), DirectoryError> {
        let permissions = self.permissions.materialize(identity, env).await?;
        let settings = self.settings.settings_for(identity, env).await?;
        identity.materialize(permissions, settings);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeMap,
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;
    use rstest::rstest;

    use super::*;
    use crate::{
        auth::{MemoryTokenStore, Session, TokenStoreError, TokenStoreResult},
        env::{EnvironmentStore, MemoryEnvironmentStore},
        models::{AccessToken, Kid, PermissionSet, Profile},
        services::{
            DirectoryResult, MemoryCascadeSettings, MemoryPermissionService, MemoryUserDirectory,
            SettingScope, SettingValue, UserRecord,
        },
    };

    const ENV_ID: &str = "0010000000001";
    const OTHER_ENV_ID: &str = "0010000000002";
    const USER_ID: &str = "0040000000042";

    /// Token store that counts lookups.
    #[derive(Default)]
    struct CountingTokens {
        inner: MemoryTokenStore,
        lookups: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl TokenStore for CountingTokens {
        async fn get_token(&self, token: &str) -> TokenStoreResult<Option<AccessToken>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TokenStoreError::Unavailable("timeout".into()));
            }
            self.inner.get_token(token).await
        }

        async fn store(&self, token: AccessToken) -> TokenStoreResult<()> {
            self.inner.store(token).await
        }

        async fn revoke(&self, token: &str) -> TokenStoreResult<bool> {
            self.inner.revoke(token).await
        }

        async fn cleanup(&self) -> TokenStoreResult<usize> {
            self.inner.cleanup().await
        }
    }

    /// Permission service that counts materializations.
    #[derive(Default)]
    struct CountingPermissions {
        inner: MemoryPermissionService,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PermissionService for CountingPermissions {
        async fn materialize(
            &self,
            identity: &Identity,
            env: &Environment,
        ) -> DirectoryResult<PermissionSet> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.materialize(identity, env).await
        }
    }

    struct BrokenDirectory;

    #[async_trait]
    impl UserDirectory for BrokenDirectory {
        async fn authenticate(
            &self,
            _username: &str,
            _password: &str,
            _env: &Environment,
        ) -> DirectoryResult<Option<Identity>> {
            Err(DirectoryError::Unavailable("db down".into()))
        }

        async fn load_identity(
            &self,
            _user_id: &Kid,
            _env: &Environment,
        ) -> DirectoryResult<Option<Identity>> {
            Err(DirectoryError::Unavailable("db down".into()))
        }
    }

    struct Fixture {
        resolver: AuthorizationResolver,
        tokens: Arc<CountingTokens>,
        permissions: Arc<CountingPermissions>,
    }

    async fn fixture_with(tokens: CountingTokens, users: Option<Arc<dyn UserDirectory>>) -> Fixture {
        let envs = MemoryEnvironmentStore::new();
        envs.insert(Environment::new(Kid::parse(ENV_ID).unwrap(), "dev"))
            .await
            .unwrap();
        envs.insert(Environment::new(Kid::parse(OTHER_ENV_ID).unwrap(), "other"))
            .await
            .unwrap();

        let directory = MemoryUserDirectory::new();
        directory.insert(
            Kid::parse(ENV_ID).unwrap(),
            UserRecord::new(
                Kid::parse(USER_ID).unwrap(),
                "u42",
                "pw",
                Profile::new(Kid::parse("0060000000002").unwrap(), "Sales"),
            ),
        );

        let settings = MemoryCascadeSettings::new();
        settings.set(
            Kid::parse(ENV_ID).unwrap(),
            SettingValue::new("theme", "dark", SettingScope::Environment),
        );

        let users: Arc<dyn UserDirectory> = match users {
            Some(users) => users,
            None => Arc::new(directory),
        };
        let tokens = Arc::new(tokens);
        let permissions = Arc::new(CountingPermissions::default());
        let resolver = AuthorizationResolver::new(
            EnvironmentResolver::new(Arc::new(envs)),
            tokens.clone(),
            users,
            permissions.clone(),
            Arc::new(settings),
        );
        Fixture {
            resolver,
            tokens,
            permissions,
        }
    }

    async fn fixture() -> Fixture {
        let fixture = fixture_with(CountingTokens::default(), None).await;
        fixture
            .tokens
            .store(AccessToken::new(
                "tok-xyz",
                "ref-xyz",
                Kid::parse(USER_ID).unwrap(),
                Kid::parse(ENV_ID).unwrap(),
                3600,
            ))
            .await
            .unwrap();
        fixture
    }

    fn logged_in_session(user_seq: u64) -> SessionContext {
        let mut session = Session::new(Duration::from_secs(3600));
        session.login(Identity::new(
            Kid::from_sequence(Kid::USER_PREFIX, user_seq).unwrap(),
            "session-user",
            Kid::parse(ENV_ID).unwrap(),
            Profile::new(Kid::parse("0060000000001").unwrap(), Profile::ROOT),
        ));
        SessionContext::new(session)
    }

    #[rstest]
    #[case("001abc")]
    #[case("x")]
    #[case("00100000000011")]
    #[tokio::test]
    async fn test_malformed_env_never_consults_tokens(#[case] raw: &str) {
        let f = fixture().await;
        let err = f
            .resolver
            .prepare_request(Some(raw), Some("tok-xyz"), &SessionContext::anonymous())
            .await
            .unwrap_err();

        assert_eq!(err.status(), http::StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains(raw));
        assert_eq!(f.tokens.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_session_identity_takes_precedence() {
        let f = fixture().await;
        let session = logged_in_session(7);

        let authorized = f
            .resolver
            .prepare_request(Some(ENV_ID), Some("tok-xyz"), &session)
            .await
            .unwrap();

        assert_eq!(authorized.source, IdentitySource::Session);
        assert_eq!(authorized.identity.user_name, "session-user");
        assert_eq!(f.tokens.lookups.load(Ordering::SeqCst), 0);
        assert_eq!(f.permissions.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_session_identity_from_other_environment_is_forbidden() {
        let f = fixture().await;
        // Identity scoped to ENV_ID, request names OTHER_ENV_ID.
        let session = logged_in_session(7);

        let err = f
            .resolver
            .prepare_request(Some(OTHER_ENV_ID), Some("tok-xyz"), &session)
            .await
            .unwrap_err();

        assert_eq!(err, AuthError::Unauthenticated);
        assert_eq!(f.tokens.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_token_path_resolves_owner() {
        let f = fixture().await;
        let authorized = f
            .resolver
            .prepare_request(Some(ENV_ID), Some("tok-xyz"), &SessionContext::anonymous())
            .await
            .unwrap();

        assert_eq!(authorized.source, IdentitySource::BearerToken);
        assert_eq!(authorized.identity.user_id.as_str(), USER_ID);
        assert_eq!(authorized.environment.id.as_str(), ENV_ID);
        assert_eq!(authorized.identity.env_id, authorized.environment.id);
        assert!(authorized.identity.is_materialized());
        assert_eq!(authorized.identity.setting("theme"), Some("dark"));
        assert_eq!(f.tokens.lookups.load(Ordering::SeqCst), 1);
        assert_eq!(f.permissions.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_token_path_with_session_environment() {
        let f = fixture().await;
        let mut session = Session::new(Duration::from_secs(3600));
        session.env_id = Some(Kid::parse(ENV_ID).unwrap());

        let authorized = f
            .resolver
            .prepare_request(None, Some("tok-xyz"), &SessionContext::new(session))
            .await
            .unwrap();
        assert_eq!(authorized.environment.id.as_str(), ENV_ID);
        assert_eq!(authorized.source, IdentitySource::BearerToken);
    }

    #[rstest]
    #[case(Some("unknown-token"))]
    #[case(Some(""))]
    #[case(Some("   "))]
    #[case(None)]
    #[tokio::test]
    async fn test_no_identity_is_forbidden(#[case] token: Option<&str>) {
        let f = fixture().await;
        let err = f
            .resolver
            .prepare_request(Some(ENV_ID), token, &SessionContext::anonymous())
            .await
            .unwrap_err();

        assert_eq!(err, AuthError::Unauthenticated);
        assert_eq!(err.status(), http::StatusCode::FORBIDDEN);
        assert_eq!(err.to_string(), "Access Denied");
    }

    #[tokio::test]
    async fn test_blank_token_skips_lookup() {
        let f = fixture().await;
        let _ = f
            .resolver
            .prepare_request(Some(ENV_ID), Some("  "), &SessionContext::anonymous())
            .await;
        assert_eq!(f.tokens.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expired_token_is_forbidden() {
        let f = fixture_with(CountingTokens::default(), None).await;
        let mut token = AccessToken::new(
            "old",
            "ref",
            Kid::parse(USER_ID).unwrap(),
            Kid::parse(ENV_ID).unwrap(),
            60,
        );
        token.issued_at = chrono::Utc::now() - chrono::Duration::seconds(61);
        f.tokens.store(token).await.unwrap();

        let err = f
            .resolver
            .prepare_request(Some(ENV_ID), Some("old"), &SessionContext::anonymous())
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::Unauthenticated);
    }

    #[tokio::test]
    async fn test_token_from_other_environment_is_forbidden() {
        let f = fixture().await;
        let err = f
            .resolver
            .prepare_request(Some(OTHER_ENV_ID), Some("tok-xyz"), &SessionContext::anonymous())
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::Unauthenticated);
        assert_eq!(f.permissions.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_token_store_fault_is_forbidden() {
        let f = fixture_with(
            CountingTokens {
                fail: true,
                ..Default::default()
            },
            None,
        )
        .await;
        let err = f
            .resolver
            .prepare_request(Some(ENV_ID), Some("tok-xyz"), &SessionContext::anonymous())
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::Unauthenticated);
    }

    #[tokio::test]
    async fn test_directory_fault_is_forbidden() {
        let f = fixture_with(CountingTokens::default(), Some(Arc::new(BrokenDirectory))).await;
        f.tokens
            .store(AccessToken::new(
                "tok-xyz",
                "ref",
                Kid::parse(USER_ID).unwrap(),
                Kid::parse(ENV_ID).unwrap(),
                3600,
            ))
            .await
            .unwrap();

        let err = f
            .resolver
            .prepare_request(Some(ENV_ID), Some("tok-xyz"), &SessionContext::anonymous())
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::Unauthenticated);
    }

    #[tokio::test]
    async fn test_environment_failure_precedes_identity() {
        let f = fixture().await;
        let err = f
            .resolver
            .prepare_request(None, Some("tok-xyz"), &SessionContext::anonymous())
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::MissingEnvironment { requested: None });
        assert_eq!(f.tokens.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_repeated_calls_are_value_equal() {
        let f = fixture().await;
        let first = f
            .resolver
            .prepare_request(Some(ENV_ID), Some("tok-xyz"), &SessionContext::anonymous())
            .await
            .unwrap();
        let second = f
            .resolver
            .prepare_request(Some(ENV_ID), Some("tok-xyz"), &SessionContext::anonymous())
            .await
            .unwrap();

        assert_eq!(first.identity.user_id, second.identity.user_id);
        assert_eq!(first.environment.id, second.environment.id);
        assert!(!Arc::ptr_eq(&first.identity, &second.identity));
        assert_eq!(first.identity, second.identity);
        assert_eq!(f.permissions.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_materialize_sets_both_caches() {
        let f = fixture().await;
        let env = Environment::new(Kid::parse(ENV_ID).unwrap(), "dev");
        let mut identity = Identity::new(
            Kid::parse(USER_ID).unwrap(),
            "u42",
            env.id.clone(),
            Profile::new(Kid::parse("0060000000002").unwrap(), "Sales"),
        );
        f.resolver.materialize(&mut identity, &env).await.unwrap();

        assert_eq!(identity.permissions, Some(PermissionSet::default()));
        let mut expected = BTreeMap::new();
        expected.insert("theme".to_string(), "dark".to_string());
        assert_eq!(identity.cascade_settings, Some(expected));
    }
}
