//! HTTP route handlers.

pub mod health;
pub mod metrics;
pub mod orders;
pub mod products;

use axum::http::HeaderMap;
use common::{ActorId, AggregateId};

use crate::error::ApiError;

/// Header naming who performs a write.
pub const ACTOR_HEADER: &str = "x-actor-id";

fn parse_aggregate_id(id: &str) -> Result<AggregateId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))?;
    Ok(AggregateId::from(uuid))
}

fn actor(headers: &HeaderMap) -> ActorId {
    headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ActorId::new)
        .unwrap_or_else(ActorId::system)
}
