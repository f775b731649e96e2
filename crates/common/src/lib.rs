//! Shared identifier types used across the commerce workspace.

mod ids;

pub use ids::{ActorId, AggregateId, RecordId};
