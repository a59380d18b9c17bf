//! HTTP routes.
pub mod status;
pub mod verify;

use axum::extract::{Form, FromRequest, Request};
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::error::ServerError;
use crate::verify::LOG_TARGET;

/// Form body checked with [`Validate`].
///
/// An undecodable body and a body failing validation are both reported as
/// [`ServerError::MissingFields`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidForm<T>(pub T);

impl<T, S> FromRequest<S> for ValidForm<T>
where
    T: DeserializeOwned + Validate + Send,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(
        req: Request,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        let value = match Form::<T>::from_request(req, state).await {
            Ok(Form(value)) => value,
            Err(rejection) => {
                tracing::debug!(%rejection, "form body rejected");
                tracing::error!(target: LOG_TARGET, "Missing required fields");
                return Err(ServerError::MissingFields);
            },
        };

        if let Err(errors) = value.validate() {
            tracing::debug!(%errors, "form body failed validation");
            tracing::error!(target: LOG_TARGET, "Missing required fields");
            return Err(ServerError::MissingFields);
        }

        Ok(ValidForm(value))
    }
}
