//! Request authorization middleware.
//!
//! Collects the three inputs of [`AuthorizationResolver::prepare_request`]
//! from the HTTP request and either attaches the [`Authorized`] result to the
//! request extensions or short-circuits with the rendered error.
//!
//! [`AuthorizationResolver::prepare_request`]: crate::auth::AuthorizationResolver::prepare_request

use axum::{
    extract::{Query, Request, State},
    http::{HeaderMap, Uri, header},
    middleware::Next,
    response::Response,
};
use serde::Deserialize;
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    AppState,
    auth::{AuthError, Authorized, Session, SessionContext},
    response::ResponseFormat,
};

/// Header carrying an explicit environment ID.
pub const ENV_HEADER: &str = "X-Kommet-Env";

#[derive(Debug, Deserialize)]
struct AuthQuery {
    env: Option<String>,
    access_token: Option<String>,
}

/// Authorize every request routed through it.
///
/// Environment: `env` query parameter, else the `X-Kommet-Env` header.
/// Token: `Authorization: Bearer`, else the `access_token` query parameter.
/// Session: the session cookie.
pub async fn authorize_middleware(
    State(state): State<AppState>,
    cookies: Cookies,
    mut req: Request,
    next: Next,
) -> Response {
    let format = ResponseFormat::from_headers(req.headers());
    let query = match auth_query(req.uri()) {
        Ok(query) => query,
        Err(err) => return err.render(format),
    };
    let explicit_env = match query.env {
        Some(env) => Some(env),
        None => match env_header(req.headers()) {
            Ok(env) => env,
            Err(err) => return err.render(format),
        },
    };
    let bearer = extract_bearer_token(req.headers()).or(query.access_token);
    let session = SessionContext::from(load_session(&state, &cookies).await);

    match state
        .resolver
        .prepare_request(explicit_env.as_deref(), bearer.as_deref(), &session)
        .await
    {
        Ok(authorized) => {
            req.extensions_mut().insert::<Authorized>(authorized);
            req.extensions_mut().insert(session);
            next.run(req).await
        }
        Err(err) => err.render(format),
    }
}

/// Load the caller's session from its cookie.
///
/// A missing, unparseable, unknown or expired cookie yields `None`. Store
/// failures are logged and treated the same way.
pub async fn load_session(state: &AppState, cookies: &Cookies) -> Option<Session> {
    let cookie = cookies.get(&state.config.auth.session.cookie_name)?;
    let id = Uuid::parse_str(cookie.value()).ok()?;
    match state.sessions.get(id).await {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(session_id = %id, error = %e, "Session lookup failed");
            None
        }
    }
}

/// Extract a bearer token from the `Authorization` header.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth) = headers.get(header::AUTHORIZATION)
        && let Ok(auth_str) = auth.to_str()
        && let Some(token) = auth_str
            .strip_prefix("Bearer ")
            .or_else(|| auth_str.strip_prefix("bearer "))
    {
        return Some(token.trim().to_string());
    }
    None
}

/// Parse the `env` and `access_token` query parameters.
///
/// A query that does not deserialize (a repeated key, broken percent
/// encoding) is rejected rather than ignored, naming the `env` values it
/// carried, or the whole query when none can be read.
fn auth_query(uri: &Uri) -> Result<AuthQuery, AuthError> {
    Query::<AuthQuery>::try_from_uri(uri)
        .map(|Query(query)| query)
        .map_err(|rejection| {
            let env_values = Query::<Vec<(String, String)>>::try_from_uri(uri)
                .map(|Query(pairs)| {
                    pairs
                        .into_iter()
                        .filter(|(key, _)| key == "env")
                        .map(|(_, value)| value)
                        .collect::<Vec<_>>()
                        .join(",")
                })
                .unwrap_or_default();
            let raw = if env_values.is_empty() {
                uri.query().unwrap_or_default().to_string()
            } else {
                env_values
            };
            tracing::debug!(raw, error = %rejection, "Rejected unreadable query");
            AuthError::MalformedReference { raw }
        })
}

/// Read the `X-Kommet-Env` header. A value that is not visible ASCII is
/// rejected rather than skipped.
fn env_header(headers: &HeaderMap) -> Result<Option<String>, AuthError> {
    let Some(value) = headers.get(ENV_HEADER) else {
        return Ok(None);
    };
    match value.to_str() {
        Ok(env) => Ok(Some(env.to_string())),
        Err(_) => {
            let raw = String::from_utf8_lossy(value.as_bytes()).into_owned();
            tracing::debug!(raw, "Rejected unreadable environment header");
            Err(AuthError::MalformedReference { raw })
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::standard("Bearer tok-xyz", Some("tok-xyz"))]
    #[case::lowercase_scheme("bearer tok-xyz", Some("tok-xyz"))]
    #[case::padded("Bearer   tok-xyz  ", Some("tok-xyz"))]
    #[case::basic_scheme("Basic dXNlcjpwYXNz", None)]
    #[case::bare_token("tok-xyz", None)]
    fn test_extract_bearer_token(#[case] value: &str, #[case] expected: Option<&str>) {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        assert_eq!(extract_bearer_token(&headers).as_deref(), expected);
    }

    #[test]
    fn test_no_authorization_header() {
        assert!(extract_bearer_token(&HeaderMap::new()).is_none());
    }

    #[test]
    fn test_auth_query() {
        let uri: Uri = "/api/me?env=0010000000001&access_token=tok".parse().unwrap();
        let query = auth_query(&uri).unwrap();
        assert_eq!(query.env.as_deref(), Some("0010000000001"));
        assert_eq!(query.access_token.as_deref(), Some("tok"));

        let bare: Uri = "/api/me".parse().unwrap();
        let query = auth_query(&bare).unwrap();
        assert!(query.env.is_none());
        assert!(query.access_token.is_none());
    }

    #[test]
    fn test_repeated_env_is_rejected() {
        let uri: Uri = "/api/me?env=001abc&env=001abc".parse().unwrap();
        let err = auth_query(&uri).unwrap_err();
        assert_eq!(err.status(), http::StatusCode::BAD_REQUEST);
        assert!(matches!(&err, AuthError::MalformedReference { raw } if raw.contains("001abc")));
    }

    #[test]
    fn test_env_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(env_header(&headers).unwrap(), None);

        headers.insert(ENV_HEADER, HeaderValue::from_static("0010000000001"));
        assert_eq!(env_header(&headers).unwrap().as_deref(), Some("0010000000001"));

        headers.insert(ENV_HEADER, HeaderValue::from_bytes(b"001\xff0000000001").unwrap());
        let err = env_header(&headers).unwrap_err();
        assert!(matches!(err, AuthError::MalformedReference { .. }));
    }
}
