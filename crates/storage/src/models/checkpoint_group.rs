use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A cohort of teams following the same route and ruleset.
///
/// Member checkpoints are ordered through [`CheckpointGroupLink`]; the first
/// and last links mark the route's start and finish for standings timing.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CheckpointGroup {
    pub id: i64,
    pub competition_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub position: Option<i32>,
}

/// Membership of a checkpoint in a group, with its ordinal on the route.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CheckpointGroupLink {
    pub checkpoint_id: i64,
    pub group_id: i64,
    pub position: Option<i32>,
}
