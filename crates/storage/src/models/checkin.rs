use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A team's arrival at a checkpoint. At most one per (team, checkpoint);
/// repeat submissions reuse the original timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Checkin {
    pub id: i64,
    pub competition_id: i64,
    pub team_id: i64,
    pub checkpoint_id: i64,
    pub timestamp: NaiveDateTime,
}
