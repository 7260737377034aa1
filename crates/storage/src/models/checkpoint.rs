use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Checkpoint {
    pub id: i64,
    pub competition_id: i64,
    pub name: String,
    pub location: Option<String>,
}
