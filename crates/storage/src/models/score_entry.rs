use chrono::NaiveDateTime;
use scoring::RawFields;
use serde::{Deserialize, Serialize};

/// An append-only score entry. Entries are never updated in place; a
/// correction or a recomputation appends a new row and the latest-entry
/// index moves forward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub id: i64,
    pub competition_id: i64,
    pub checkin_id: i64,
    pub team_id: i64,
    pub checkpoint_id: i64,
    pub judge_id: Option<i64>,
    pub raw_fields: RawFields,
    pub total: Option<f64>,
    pub created_at: NaiveDateTime,
}

/// Fields for an entry about to be appended. The store assigns the id and
/// updates the latest-entry index in the same transaction.
#[derive(Debug, Clone)]
pub struct NewScoreEntry {
    pub competition_id: i64,
    pub checkin_id: i64,
    pub team_id: i64,
    pub checkpoint_id: i64,
    pub judge_id: Option<i64>,
    pub raw_fields: RawFields,
    pub total: Option<f64>,
    pub created_at: NaiveDateTime,
}
