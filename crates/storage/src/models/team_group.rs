use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A team's membership in a checkpoint group.
///
/// A team carries at most one active membership at a time; reassignment
/// deactivates the previous row instead of deleting it, so past score
/// entries keep their historical context.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TeamGroup {
    pub id: i64,
    pub team_id: i64,
    pub group_id: i64,
    pub active: bool,
}
