mod authorize;
mod request_id;
mod role_gate;

pub use authorize::{ENV_HEADER, authorize_middleware, extract_bearer_token, load_session};
pub use request_id::{REQUEST_ID_HEADER, RequestId, request_id_middleware};
pub use role_gate::{RoleGate, role_gate_middleware};
