use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Physical card mapped to a team. The UID is stored normalized
/// (trimmed, uppercase) so scans resolve regardless of reader casing.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TeamCard {
    pub id: i64,
    pub team_id: i64,
    pub uid: String,
}

/// Canonical form of a card UID as submitted by a reader.
pub fn normalize_card_uid(uid: &str) -> String {
    uid.trim().to_uppercase()
}
