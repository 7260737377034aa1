use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Team {
    pub id: i64,
    pub competition_id: i64,
    pub name: String,
    pub number: Option<i32>,
    pub organization: Option<String>,
    pub dnf: bool,
}
