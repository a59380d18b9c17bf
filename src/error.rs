//! Error handler for ldap-check.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use ldap3::LdapError;
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServerError>;

/// Every way a verification request can end early.
///
/// `Display` output is the message returned to the caller, so wording is
/// part of the HTTP contract.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("All fields are required")]
    MissingFields,

    #[error("Failed to connect to LDAP server: {server}")]
    Connect {
        server: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Admin bind failed. DN: {dn}. Error: {source}")]
    AdminBind { dn: String, source: LdapError },

    #[error("Search failed for user: {username}. Error: {source}")]
    Search { username: String, source: LdapError },

    #[error("User not found: {username}")]
    UserNotFound { username: String },

    #[error("User authentication failed. DN: {dn}. Error: {source}")]
    Authentication { dn: String, source: LdapError },

    #[error("Internal server error")]
    Internal,
}

impl ServerError {
    /// Stable label used for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerError::MissingFields => "invalid_request",
            ServerError::Connect { .. } => "connect_failure",
            ServerError::AdminBind { .. } => "bind_failure",
            ServerError::Search { .. } => "search_failure",
            ServerError::UserNotFound { .. } => "user_not_found",
            ServerError::Authentication { .. } => "auth_failure",
            ServerError::Internal => "internal",
        }
    }

    /// HTTP status for this error.
    ///
    /// Without `detailed`, every verification failure is a plain
    /// `400 Bad Request`. [`ServerError::Internal`] is always `500`.
    pub fn status(&self, detailed: bool) -> StatusCode {
        match self {
            ServerError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            _ if !detailed => StatusCode::BAD_REQUEST,
            ServerError::MissingFields => StatusCode::BAD_REQUEST,
            ServerError::Connect { .. } | ServerError::Search { .. } => {
                StatusCode::BAD_GATEWAY
            },
            ServerError::AdminBind { .. }
            | ServerError::Authentication { .. } => StatusCode::UNAUTHORIZED,
            ServerError::UserNotFound { .. } => StatusCode::NOT_FOUND,
        }
    }

    /// Transform [`ServerError`] into axum [`Response`].
    pub fn respond(self, detailed: bool) -> Response {
        let status = self.status(detailed);
        let body = ResponseError::new(self.to_string());

        match serde_json::to_string(&body) {
            Ok(body) => Response::builder()
                .status(status)
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.into())
                .unwrap_or_else(|_| internal_server_error()),
            Err(_) => internal_server_error(),
        }
    }
}

/// Failure body shared by every route.
#[derive(Debug, Serialize)]
pub struct ResponseError {
    success: bool,
    error: String,
}

impl ResponseError {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        self.respond(false)
    }
}

/// Last resort when an error body cannot be built.
fn internal_server_error() -> Response {
    let error = ServerError::Internal;

    Response::builder()
        .status(error.status(false))
        .header(header::CONTENT_TYPE, "application/json")
        .body(
            serde_json::json!({
                "success": false,
                "error": error.to_string(),
            })
            .to_string()
            .into(),
        )
        .unwrap_or_else(|_| Response::new(error.to_string().into()))
}
