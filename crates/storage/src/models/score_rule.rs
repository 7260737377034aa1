use chrono::NaiveDateTime;
use scoring::{GlobalRuleSpec, ScoreRuleSpec};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Scoring rule row for one (checkpoint, group) pair. The `rules` column
/// holds the JSON document; [`ScoreRule::spec`] parses it on demand.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScoreRule {
    pub id: i64,
    pub competition_id: i64,
    pub checkpoint_id: i64,
    pub group_id: i64,
    pub rules: serde_json::Value,
    pub created_at: NaiveDateTime,
}

impl ScoreRule {
    pub fn spec(&self) -> scoring::Result<ScoreRuleSpec> {
        ScoreRuleSpec::parse(self.rules.clone())
    }
}

/// Per-group rule evaluated against a team's check-ins rather than one
/// entry. One row per (competition, group).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GlobalScoreRule {
    pub id: i64,
    pub competition_id: i64,
    pub group_id: i64,
    pub rules: serde_json::Value,
    pub created_at: NaiveDateTime,
}

impl GlobalScoreRule {
    pub fn spec(&self) -> scoring::Result<GlobalRuleSpec> {
        GlobalRuleSpec::parse(self.rules.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_spec_parses_stored_document() {
        let rule = ScoreRule {
            id: 1,
            competition_id: 1,
            checkpoint_id: 2,
            group_id: 3,
            rules: json!({"field_rules": {"hits": {"type": "multiplier", "factor": 2.0}}}),
            created_at: chrono::Utc::now().naive_utc(),
        };
        let spec = rule.spec().unwrap();
        assert!(spec.field_rules.contains_key("hits"));
    }

    #[test]
    fn test_spec_surfaces_invalid_document() {
        let rule = ScoreRule {
            id: 1,
            competition_id: 1,
            checkpoint_id: 2,
            group_id: 3,
            rules: json!({"time_race": {"start_checkpoint_id": 5}}),
            created_at: chrono::Utc::now().naive_utc(),
        };
        assert!(rule.spec().is_err());
    }
}
