//! Writer identity extraction.
//!
//! Every write request carries the caller's instance id in the
//! `x-instance-id` header so the resulting change event can name its origin.
//! The header is optional: anonymous writes produce events with a null
//! source.

use axum::{extract::FromRequestParts, http::request::Parts};
use kvsync_engine::{InstanceId, INSTANCE_HEADER};

use crate::error::AppError;

/// Instance that issued the request, if it identified itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin(pub Option<InstanceId>);

impl<S> FromRequestParts<S> for Origin
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(INSTANCE_HEADER) else {
            return Ok(Origin(None));
        };

        let raw = value
            .to_str()
            .map_err(|_| AppError::BadRequest(format!("{INSTANCE_HEADER} must be ASCII")))?;

        Ok(Origin(Some(InstanceId::parse(raw)?)))
    }
}
