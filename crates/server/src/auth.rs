use axum::http::HeaderMap;
use secrecy::{ExposeSecret, SecretString};
use uuid::Uuid;

use consult_core::domain::actor::{Actor, ActorRole, CallContext};
use consult_core::errors::InterfaceError;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";
pub const INTERNAL_AUTH_HEADER: &str = "x-internal-auth";
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Correlation id supplied by the caller, or a fresh one.
pub fn correlation_id(headers: &HeaderMap) -> String {
    header(headers, CORRELATION_ID_HEADER)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Builds the call context from identity headers set by the upstream gateway.
pub fn authenticate(
    headers: &HeaderMap,
    shared_secret: Option<&SecretString>,
    correlation_id: String,
) -> Result<CallContext, InterfaceError> {
    if let Some(secret) = shared_secret {
        if header(headers, INTERNAL_AUTH_HEADER) != Some(secret.expose_secret()) {
            return Err(unauthorized("missing or invalid internal auth header", correlation_id));
        }
    }

    let Some(actor_id) = header(headers, ACTOR_ID_HEADER) else {
        return Err(unauthorized("missing x-actor-id header", correlation_id));
    };
    let Some(role) = header(headers, ACTOR_ROLE_HEADER) else {
        return Err(unauthorized("missing x-actor-role header", correlation_id));
    };
    let Some(role) = ActorRole::parse(role) else {
        return Err(unauthorized(format!("unknown actor role `{role}`"), correlation_id));
    };

    Ok(CallContext::new(Actor::new(actor_id, role), correlation_id))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn unauthorized(message: impl Into<String>, correlation_id: String) -> InterfaceError {
    InterfaceError::Unauthorized { message: message.into(), correlation_id }
}
