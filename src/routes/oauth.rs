//! OAuth2 token endpoint.
//!
//! Only the password grant is supported. `client_id` and `client_secret` are
//! required but not verified.

use axum::{
    Form, Json,
    extract::{State, rejection::FormRejection},
    response::{IntoResponse, Response},
};
use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::{
    AppState,
    auth::{AuthError, SessionContext, generate_token},
    models::AccessToken,
    observability::metrics,
    response::{ResponseFormat, error_response},
};

const PASSWORD_GRANT: &str = "password";

#[derive(Debug, Default, Deserialize)]
pub struct TokenRequest {
    pub grant_type: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub env: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: u64,
    pub refresh_token: String,
}

/// Body returned when the credentials are rejected.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenDenied {
    pub access_token: String,
}

/// `POST /oauth/token`
#[tracing::instrument(name = "oauth.token", skip_all)]
pub async fn token(
    State(state): State<AppState>,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Response {
    let req = match form {
        Ok(Form(req)) => req,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "Unreadable token request");
            return bad_request(rejection.body_text());
        }
    };

    let Some(grant_type) = present(&req.grant_type).map(str::trim) else {
        return bad_request("Grant type not specified");
    };
    if !grant_type.eq_ignore_ascii_case(PASSWORD_GRANT) {
        return bad_request(format!("Grant type '{grant_type}' not supported"));
    }

    let username = present(&req.username);
    let password = present(&req.password);
    let client_id = present(&req.client_id);
    let client_secret = present(&req.client_secret);
    let env_raw = present(&req.env);

    // Credentials are used verbatim; only presence is checked.
    let (Some(username), Some(password), Some(_), Some(_), Some(env_raw)) =
        (username, password, client_id, client_secret, env_raw)
    else {
        let missing: Vec<&str> = [
            (username, "Username not specified"),
            (password, "Password not specified"),
            (client_id, "Client ID not specified"),
            (client_secret, "Client secret not specified"),
            (env_raw, "Env not specified"),
        ]
        .into_iter()
        .filter(|(value, _)| value.is_none())
        .map(|(_, message)| message)
        .collect();
        return bad_request(missing.join(". "));
    };

    let env = match state
        .resolver
        .environments()
        .resolve(Some(env_raw), &SessionContext::anonymous())
        .await
    {
        Ok(env) => env,
        Err(AuthError::MalformedReference { raw }) => {
            return bad_request(format!("Invalid environment ID {raw}"));
        }
        Err(AuthError::Unauthenticated) => return denied(),
        Err(e) => return e.into_response(),
    };

    let identity = match state.resolver.users().authenticate(username, password, &env).await {
        Ok(Some(identity)) => identity,
        Ok(None) => {
            tracing::info!(env_id = %env.id, username, "Password grant rejected");
            metrics::record_auth_attempt("password_grant", false);
            return denied();
        }
        Err(e) => {
            tracing::error!(env_id = %env.id, error = %e, "Password grant authentication failed");
            metrics::record_auth_attempt("password_grant", false);
            return denied();
        }
    };

    let ttl = state.config.auth.token_ttl_secs;
    let issued = AccessToken::new(
        generate_token(),
        generate_token(),
        identity.user_id.clone(),
        env.id.clone(),
        ttl,
    );
    let body = TokenResponse {
        access_token: issued.token.clone(),
        expires_in: ttl,
        refresh_token: issued.refresh_token.clone(),
    };

    if let Err(e) = state.resolver.tokens().store(issued).await {
        tracing::error!(user_id = %identity.user_id, error = %e, "Storing access token failed");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            vec!["Could not issue access token".to_string()],
            ResponseFormat::Json,
        );
    }

    metrics::record_auth_attempt("password_grant", true);
    tracing::info!(user_id = %identity.user_id, env_id = %env.id, "Access token issued");
    Json(body).into_response()
}

/// The field's raw value, unless it is missing or blank.
fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

fn bad_request(message: impl Into<String>) -> Response {
    error_response(StatusCode::BAD_REQUEST, vec![message.into()], ResponseFormat::Json)
}

fn denied() -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(TokenDenied {
            access_token: "access_denied".to_string(),
        }),
    )
        .into_response()
}
