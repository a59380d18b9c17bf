//! `POST /ldap-test`: check a user's directory credentials.

use axum::Json;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::AppState;
use crate::router::ValidForm;
use crate::verify::{VerificationRequest, VerifiedUser, verify};

#[derive(Debug, Serialize)]
pub struct Success {
    success: bool,
    user: VerifiedUser,
}

/// Handler to verify credentials.
pub async fn handler(
    State(state): State<AppState>,
    ValidForm(body): ValidForm<VerificationRequest>,
) -> Response {
    match verify(state.directory.as_ref(), &body).await {
        Ok(user) => Json(Success {
            success: true,
            user,
        })
        .into_response(),
        Err(err) => err.respond(state.config.detailed_status),
    }
}
