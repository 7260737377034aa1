use serde::{Deserialize, Serialize};
use validator::Validate;

/// Request payload for creating or replacing a checkpoint scoring rule
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SaveScoreRuleRequest {
    #[validate(range(min = 1))]
    pub competition_id: i64,

    #[validate(range(min = 1))]
    pub checkpoint_id: i64,

    #[validate(range(min = 1))]
    pub group_id: i64,

    pub rules: serde_json::Value,
}

/// Request payload for creating or replacing a group's global rule
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SaveGlobalRuleRequest {
    #[validate(range(min = 1))]
    pub competition_id: i64,

    #[validate(range(min = 1))]
    pub group_id: i64,

    pub rules: serde_json::Value,
}
