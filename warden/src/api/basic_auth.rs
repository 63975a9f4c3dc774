use axum::{
    extract::{Request, State},
    http,
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::api::error::AppError;
use crate::app_state::SharedAppState;

/// Caller identity resolved from the bearer token. Credential checks beyond
/// the configured static tokens belong to the upstream identity provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CurrentUser {
    pub identifier: String,
}

pub async fn auth(
    State(state): State<SharedAppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = req
        .headers()
        .get(http::header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok());

    let Some(auth_header) = auth_header else {
        warn!(
            "Missing Authorization header | {} {}",
            req.method(),
            req.uri()
        );
        return Err(AppError::Unauthorized);
    };

    match authorize_bearer_user(&state, auth_header) {
        Some(user) => {
            debug!("Caller resolved: {}", user.identifier);
            req.extensions_mut().insert(user);
            Ok(next.run(req).await)
        }
        None => {
            warn!(
                "Authentication failed for {} {}",
                req.method(),
                req.uri()
            );
            Err(AppError::Unauthorized)
        }
    }
}

/// Resolve `Bearer <secret>` against the configured token table.
pub fn authorize_bearer_user(state: &SharedAppState, auth_header: &str) -> Option<CurrentUser> {
    let token = auth_header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        return None;
    }

    let identifier = find_token_identifier(state, token)?;
    Some(CurrentUser {
        identifier: format!("identifier:{}", identifier),
    })
}

fn find_token_identifier(state: &SharedAppState, token: &str) -> Option<String> {
    for (identifier, configured_token) in &state.settings.api.bearer_tokens {
        if token.as_bytes().ct_eq(configured_token.as_bytes()).into() {
            return Some(identifier.clone());
        }
    }
    None
}
