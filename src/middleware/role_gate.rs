use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::{
    auth::Authorized,
    authz::{self, RoleRequirement},
    i18n::MessageCatalog,
    response::ResponseFormat,
};

/// State for [`role_gate_middleware`]: what to require and where denial
/// messages come from.
#[derive(Clone)]
pub struct RoleGate {
    requirement: RoleRequirement,
    catalog: Arc<MessageCatalog>,
}

impl RoleGate {
    pub fn new(requirement: RoleRequirement, catalog: Arc<MessageCatalog>) -> Self {
        Self {
            requirement,
            catalog,
        }
    }
}

/// Reject requests whose identity lacks the gate's roles.
///
/// Must be layered inside `authorize_middleware`. A request that reaches it
/// without an [`Authorized`] extension is denied.
pub async fn role_gate_middleware(State(gate): State<RoleGate>, req: Request, next: Next) -> Response {
    let identity = req
        .extensions()
        .get::<Authorized>()
        .map(|a| a.identity.as_ref());

    match authz::check(&gate.requirement, identity, &gate.catalog) {
        Ok(()) => next.run(req).await,
        Err(err) => {
            crate::observability::metrics::record_auth_failure(err.code());
            err.render(ResponseFormat::from_headers(req.headers()))
        }
    }
}
