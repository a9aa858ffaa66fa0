use axum::body::Bytes;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::AppError;

pub fn parse_payload<T: DeserializeOwned>(body: &Bytes) -> Result<T, AppError> {
    serde_json::from_slice(body).map_err(|e| {
        debug!("Rejected payload: {e}");
        AppError::MalformedPayload
    })
}
