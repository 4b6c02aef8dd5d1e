//! Session routes.
//!
//! - `POST /auth/login` - authenticate with username and password, bind the session
//! - `POST /auth/logout` - end the latest "login as", or log out
//! - `POST /auth/login-as` - act as another user of the environment (root only)

use axum::{
    Extension, Form, Json, Router,
    extract::{State, rejection::FormRejection},
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::post,
};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use tower_cookies::{
    Cookie, Cookies,
    cookie::{SameSite as CookieSameSite, time::Duration as CookieDuration},
};

use crate::{
    AppState,
    auth::{
        AuthError, Authorized, DEFAULT_LOCALE, Identity, LogoutOutcome, Session, SessionContext,
        SessionError,
    },
    authz::RoleRequirement,
    config::{SameSite, SessionConfig},
    i18n::{LOGIN_AS_FORBIDDEN, LOGIN_FAILED},
    middleware::{RoleGate, authorize_middleware, load_session, role_gate_middleware},
    models::Kid,
    observability::metrics,
    response::{ResponseFormat, error_response},
};

pub fn router(state: AppState) -> Router<AppState> {
    let login_as_gate = RoleGate::new(
        RoleRequirement::root().with_denial_message(LOGIN_AS_FORBIDDEN),
        state.catalog.clone(),
    );

    // Layers run bottom-up: authorize first, then the root gate.
    let gated = Router::new()
        .route("/login-as", post(login_as))
        .route_layer(axum::middleware::from_fn_with_state(
            login_as_gate,
            role_gate_middleware,
        ))
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            authorize_middleware,
        ));

    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .merge(gated)
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: Option<String>,
    pub password: Option<String>,
    /// Environment to log into. Defaults to the session's environment.
    pub env: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginAsForm {
    pub user_id: Option<String>,
}

/// Identity the session acts as after a session change.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub user_id: String,
    pub user_name: String,
    pub env_id: String,
    pub profile: String,
}

impl From<&Identity> for SessionIdentity {
    fn from(identity: &Identity) -> Self {
        Self {
            user_id: identity.user_id.to_string(),
            user_name: identity.user_name.clone(),
            env_id: identity.env_id.to_string(),
            profile: identity.profile.name.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub outcome: LogoutOutcome,
    /// Identity still active after the logout, if any.
    pub identity: Option<SessionIdentity>,
}

fn session_cookie(config: &SessionConfig, value: String, max_age: CookieDuration) -> Cookie<'static> {
    let same_site = match config.same_site {
        SameSite::Strict => CookieSameSite::Strict,
        SameSite::Lax => CookieSameSite::Lax,
        SameSite::None => CookieSameSite::None,
    };
    Cookie::build((config.cookie_name.clone(), value))
        .path("/")
        .http_only(true)
        .secure(config.secure)
        .same_site(same_site)
        .max_age(max_age)
        .build()
}

fn session_ttl(config: &SessionConfig) -> std::time::Duration {
    std::time::Duration::from_secs(config.ttl_secs)
}

fn unavailable(format: ResponseFormat) -> Response {
    error_response(
        StatusCode::SERVICE_UNAVAILABLE,
        vec!["Session store unavailable".to_string()],
        format,
    )
}

/// `POST /auth/login`
///
/// On success the caller gets a fresh session (the previous one, if any, is
/// discarded) whose identity already carries permissions and cascade settings.
#[tracing::instrument(name = "auth.login", skip_all)]
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    cookies: Cookies,
    form: Result<Form<LoginForm>, FormRejection>,
) -> Response {
    let format = ResponseFormat::from_headers(&headers);
    let form = match form {
        Ok(Form(form)) => form,
        Err(rejection) => {
            return error_response(StatusCode::BAD_REQUEST, vec![rejection.body_text()], format);
        }
    };

    let username = form.username.as_deref().filter(|u| !u.trim().is_empty());
    let password = form.password.as_deref().filter(|p| !p.is_empty());
    let (Some(username), Some(password)) = (username, password) else {
        let mut missing = Vec::new();
        if username.is_none() {
            missing.push("Username not specified".to_string());
        }
        if password.is_none() {
            missing.push("Password not specified".to_string());
        }
        return error_response(StatusCode::BAD_REQUEST, missing, format);
    };

    let previous = load_session(&state, &cookies).await;
    let context = SessionContext::from(previous.clone());
    let env = match state
        .resolver
        .environments()
        .resolve(form.env.as_deref(), &context)
        .await
    {
        Ok(env) => env,
        Err(e) => return e.render(format),
    };

    let login_failed = || {
        metrics::record_auth_attempt("password", false);
        let message = state
            .catalog
            .get(DEFAULT_LOCALE, LOGIN_FAILED)
            .unwrap_or("Invalid username or password")
            .to_string();
        error_response(StatusCode::FORBIDDEN, vec![message], format)
    };

    let mut identity = match state.resolver.users().authenticate(username, password, &env).await {
        Ok(Some(identity)) => identity,
        Ok(None) => {
            tracing::info!(env_id = %env.id, username, "Login rejected");
            return login_failed();
        }
        Err(e) => {
            tracing::error!(env_id = %env.id, error = %e, "Login authentication failed");
            return login_failed();
        }
    };

    if let Err(e) = state.resolver.materialize(&mut identity, &env).await {
        tracing::error!(user_id = %identity.user_id, error = %e, "Materializing permissions at login failed");
        return AuthError::Unauthenticated.render(format);
    }

    let session_config = &state.config.auth.session;
    let mut session = Session::new(session_ttl(session_config));
    let body = SessionIdentity::from(&identity);
    session.login(identity);

    if let Some(old) = previous
        && let Err(e) = state.sessions.delete(old.id).await
    {
        tracing::warn!(session_id = %old.id, error = %e, "Failed to discard previous session");
    }
    let session_id = match state.sessions.create(session).await {
        Ok(id) => id,
        Err(e) => {
            tracing::error!(error = %e, "Failed to create session");
            return unavailable(format);
        }
    };

    let max_age = CookieDuration::seconds(i64::try_from(session_config.ttl_secs).unwrap_or(i64::MAX));
    cookies.add(session_cookie(session_config, session_id.to_string(), max_age));

    metrics::record_auth_attempt("password", true);
    tracing::info!(
        session_id = %session_id,
        user_id = %body.user_id,
        env_id = %body.env_id,
        "Session created"
    );
    Json(body).into_response()
}

/// `POST /auth/logout`
///
/// Ends the latest "login as" if there is one, otherwise logs the primary
/// user out. The session and its environment survive.
#[tracing::instrument(name = "auth.logout", skip_all)]
pub async fn logout(State(state): State<AppState>, headers: HeaderMap, cookies: Cookies) -> Response {
    let format = ResponseFormat::from_headers(&headers);

    let Some(mut session) = load_session(&state, &cookies).await else {
        return Json(LogoutResponse {
            outcome: LogoutOutcome::NotLoggedIn,
            identity: None,
        })
        .into_response();
    };

    let outcome = session.logout();
    let identity = session.identity().map(SessionIdentity::from);
    let session_id = session.id;

    if let Err(e) = state.sessions.update(session).await {
        tracing::error!(session_id = %session_id, error = %e, "Failed to update session on logout");
        return unavailable(format);
    }

    tracing::info!(session_id = %session_id, outcome = ?outcome, "Logout");
    Json(LogoutResponse { outcome, identity }).into_response()
}

/// `POST /auth/login-as`
///
/// Push another user of the current environment onto the session's
/// "login as" stack. Only session-authenticated root users get here.
#[tracing::instrument(name = "auth.login_as", skip_all)]
pub async fn login_as(
    State(state): State<AppState>,
    Extension(authorized): Extension<Authorized>,
    Extension(context): Extension<SessionContext>,
    headers: HeaderMap,
    form: Result<Form<LoginAsForm>, FormRejection>,
) -> Response {
    let format = ResponseFormat::from_headers(&headers);
    let bad_request = |message: String| error_response(StatusCode::BAD_REQUEST, vec![message], format);

    let raw = match form {
        Ok(Form(LoginAsForm { user_id: Some(raw) })) if !raw.trim().is_empty() => raw,
        Ok(_) => return bad_request("User ID not specified".to_string()),
        Err(rejection) => return bad_request(rejection.body_text()),
    };

    // Token-authorized callers have no session to switch.
    let Some(session) = context.session().filter(|s| s.identity().is_some()) else {
        return error_response(
            StatusCode::FORBIDDEN,
            vec![SessionError::NotAuthenticated.to_string()],
            format,
        );
    };

    let Ok(user_id) = Kid::parse(raw.trim()) else {
        return bad_request(format!("User ID '{}' is not a valid Kommet ID", raw.trim()));
    };

    let env = &authorized.environment;
    let mut target = match state.resolver.users().load_identity(&user_id, env).await {
        Ok(Some(identity)) => identity,
        Ok(None) => return bad_request(format!("User with ID {user_id} not found")),
        Err(e) => {
            tracing::error!(user_id = %user_id, error = %e, "Loading login-as target failed");
            return AuthError::Unauthenticated.render(format);
        }
    };
    if let Err(e) = state.resolver.materialize(&mut target, env).await {
        tracing::error!(user_id = %user_id, error = %e, "Materializing login-as target failed");
        return AuthError::Unauthenticated.render(format);
    }

    let mut session = session.clone();
    if let Err(e) = session.push_login_as(target, state.config.auth.session.login_as_max) {
        let status = match e {
            SessionError::NotAuthenticated => StatusCode::FORBIDDEN,
            SessionError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            SessionError::SameUser | SessionError::LoginAsLimit { .. } => StatusCode::BAD_REQUEST,
        };
        return error_response(status, vec![e.to_string()], format);
    }

    let Some(body) = session.identity().map(SessionIdentity::from) else {
        return AuthError::Unauthenticated.render(format);
    };
    let session_id = session.id;
    if let Err(e) = state.sessions.update(session).await {
        tracing::error!(session_id = %session_id, error = %e, "Failed to update session on login-as");
        return unavailable(format);
    }

    tracing::info!(
        session_id = %session_id,
        actor = %authorized.identity.user_id,
        user_id = %body.user_id,
        "Logged in as another user"
    );
    Json(body).into_response()
}
