use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::response::{ResponseFormat, error_response};

/// Failure of request authorization.
///
/// Only two statuses ever leave this type: 400 for a bad or missing
/// environment reference, 403 for everything identity related.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// An externally supplied ID does not parse.
    #[error("Environment ID '{raw}' is not a valid Kommet ID")]
    MalformedReference { raw: String },

    /// No environment could be determined for the request.
    ///
    /// `requested` is the explicit ID that was looked up and not found, if any.
    #[error("{}", missing_environment_message(.requested.as_deref()))]
    MissingEnvironment { requested: Option<String> },

    /// No identity was resolved by any path.
    ///
    /// Deliberately uninformative: the message never says whether the
    /// environment, token or session was at fault.
    #[error("Access Denied")]
    Unauthenticated,

    /// Identity resolved but lacks the required role. The message is already
    /// localized for the caller.
    #[error("{message}")]
    AccessDenied { message: String },
}

fn missing_environment_message(requested: Option<&str>) -> String {
    match requested {
        Some(id) => format!("Environment not specified: no environment with ID '{id}'"),
        None => "Environment not specified".to_string(),
    }
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MalformedReference { .. } | Self::MissingEnvironment { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthenticated | Self::AccessDenied { .. } => StatusCode::FORBIDDEN,
        }
    }

    /// Stable machine-readable code, used as a log field and metric label.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedReference { .. } => "malformed_reference",
            Self::MissingEnvironment { .. } => "missing_environment",
            Self::Unauthenticated => "unauthenticated",
            Self::AccessDenied { .. } => "access_denied",
        }
    }

    /// Render for a REST caller (JSON envelope) or a browser caller (HTML page).
    pub fn render(&self, format: ResponseFormat) -> Response {
        error_response(self.status(), vec![self.to_string()], format)
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        self.render(ResponseFormat::Json)
    }
}
