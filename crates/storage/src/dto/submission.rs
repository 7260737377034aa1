use scoring::{RawFields, ScoreRuleSpec};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{Checkpoint, Team};
use crate::traits::FieldDef;

/// Request payload for resolving who is about to be scored at a checkpoint
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ResolveRequest {
    #[validate(range(min = 1))]
    pub competition_id: i64,

    #[validate(range(min = 1))]
    pub checkpoint_id: i64,

    pub team_id: Option<i64>,

    #[validate(length(min = 1, max = 64))]
    pub card_uid: Option<String>,

    pub judge_id: Option<i64>,
}

/// Request payload for submitting one score entry
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SubmitRequest {
    #[validate(range(min = 1))]
    pub competition_id: i64,

    #[validate(range(min = 1))]
    pub checkpoint_id: i64,

    #[validate(range(min = 1))]
    pub team_id: i64,

    #[validate(length(min = 1, max = 64))]
    pub card_uid: Option<String>,

    pub judge_id: Option<i64>,

    #[serde(default)]
    pub fields: RawFields,
}

/// Response describing the team, the entry form and the current score state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub team: TeamSummary,
    pub checkpoint: CheckpointSummary,
    pub group_name: String,
    pub fields: Vec<FieldDef>,
    pub latest_fields: Option<RawFields>,
    pub latest_total: Option<f64>,
    pub checkin_exists: bool,
    pub rule: Option<ScoreRuleSpec>,
}

/// Response for an accepted score submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitOutcome {
    pub entry_id: i64,
    pub total: Option<f64>,
    pub checkin_created: bool,
    pub card_digest: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamSummary {
    pub id: i64,
    pub name: String,
    pub number: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub id: i64,
    pub name: String,
}

impl ResolveRequest {
    /// Additional validation that requires multiple fields
    pub fn validate_target(&self) -> Result<(), &'static str> {
        let has_card = self
            .card_uid
            .as_deref()
            .is_some_and(|uid| !uid.trim().is_empty());
        if self.team_id.is_none() && !has_card {
            return Err("card_uid or team_id is required");
        }
        Ok(())
    }
}

impl From<Team> for TeamSummary {
    fn from(team: Team) -> Self {
        Self {
            id: team.id,
            name: team.name,
            number: team.number,
        }
    }
}

impl From<Checkpoint> for CheckpointSummary {
    fn from(checkpoint: Checkpoint) -> Self {
        Self {
            id: checkpoint.id,
            name: checkpoint.name,
        }
    }
}
