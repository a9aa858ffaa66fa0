use std::sync::Arc;

use axum::{Json, body::Bytes, extract::State, http::StatusCode, response::IntoResponse};
use serde::{Deserialize, Serialize};

use crate::{
    auth::Owner,
    cart::{CartLine, Patch, ServerCart, fetch_cart, merge_cart, patch_cart},
    error::AppError,
    state::AppState,
    utils::parse_payload,
};

#[derive(Serialize)]
pub struct CartResponse {
    pub id: String,
    pub lines: Vec<CartLine>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchResponse {
    #[serde(flatten)]
    pub cart: CartResponse,
    pub removed_invalid: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResponse {
    #[serde(flatten)]
    pub cart: CartResponse,
    pub removed_from_merge: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    pub local_slugs: Vec<String>,
}

#[derive(Deserialize)]
pub struct ValidateRequest {
    pub slugs: Vec<String>,
}

impl From<ServerCart> for CartResponse {
    fn from(cart: ServerCart) -> Self {
        Self {
            id: cart.id,
            lines: cart.lines,
        }
    }
}

pub async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn get_cart_handler(
    Owner(owner): Owner,
    State(state): State<Arc<AppState>>,
) -> Result<Json<CartResponse>, AppError> {
    let cart = fetch_cart(&state, &owner).await?;

    Ok(Json(cart.into()))
}

pub async fn patch_cart_handler(
    Owner(owner): Owner,
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<PatchResponse>, AppError> {
    let patch: Patch = parse_payload(&body)?;
    let (cart, removed_invalid) = patch_cart(&state, &owner, patch).await?;

    Ok(Json(PatchResponse {
        cart: cart.into(),
        removed_invalid,
    }))
}

pub async fn merge_cart_handler(
    Owner(owner): Owner,
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<MergeResponse>, AppError> {
    let request: MergeRequest = parse_payload(&body)?;
    let (cart, removed_from_merge) = merge_cart(&state, &owner, request.local_slugs).await?;

    Ok(Json(MergeResponse {
        cart: cart.into(),
        removed_from_merge,
    }))
}

pub async fn validate_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let request: ValidateRequest = parse_payload(&body)?;

    Ok(Json(state.validate(&request.slugs).await))
}
