use std::collections::HashMap;

use chrono::NaiveDateTime;
use scoring::RawFields;
use serde::{Deserialize, Serialize};

/// One field a judge fills in at a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub key: String,
    pub label: String,
    pub field_type: String,
}

/// Column headers with special meaning in the submitted fields. `points`
/// names the column whose value overrides the computed total.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldHeaders {
    pub dead_time: Option<String>,
    pub time: Option<String>,
    pub points: Option<String>,
}

/// The entry form for one (checkpoint, group) pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub fields: Vec<FieldDef>,
    pub headers: FieldHeaders,
}

impl FieldSchema {
    /// Keys a submission may legally contain under this schema.
    pub fn allowed_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.fields.iter().map(|f| f.key.clone()).collect();
        for key in [scoring::POINTS_FIELD, scoring::TIME_FIELD, scoring::DEAD_TIME_FIELD] {
            keys.push(key.to_string());
        }
        if let Some(points) = &self.headers.points {
            keys.push(points.clone());
        }
        keys
    }
}

/// Source of entry-form schemas. The schema decides which field keys a
/// submission may carry and which column acts as the points override.
#[async_trait::async_trait]
pub trait FieldSchemaProvider: Send + Sync {
    async fn fields(
        &self,
        competition_id: i64,
        checkpoint_id: i64,
        group_name: &str,
    ) -> Option<FieldSchema>;
}

/// In-code schema registry keyed by (competition, checkpoint, group name).
/// Group names match case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct StaticSchemaProvider {
    schemas: HashMap<(i64, i64, String), FieldSchema>,
}

impl StaticSchemaProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        competition_id: i64,
        checkpoint_id: i64,
        group_name: &str,
        schema: FieldSchema,
    ) {
        self.schemas
            .insert((competition_id, checkpoint_id, group_name.to_lowercase()), schema);
    }
}

#[async_trait::async_trait]
impl FieldSchemaProvider for StaticSchemaProvider {
    async fn fields(
        &self,
        competition_id: i64,
        checkpoint_id: i64,
        group_name: &str,
    ) -> Option<FieldSchema> {
        self.schemas
            .get(&(competition_id, checkpoint_id, group_name.to_lowercase()))
            .cloned()
    }
}

/// Decides whether a judge may score at a checkpoint. Assignment policy
/// (and any admin bypass) lives entirely in the implementation.
#[async_trait::async_trait]
pub trait AuthorizationGate: Send + Sync {
    async fn can_score(&self, judge_id: Option<i64>, checkpoint_id: i64) -> bool;
}

/// Allows every submission. The default for embedded and test use.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenGate;

#[async_trait::async_trait]
impl AuthorizationGate for OpenGate {
    async fn can_score(&self, _judge_id: Option<i64>, _checkpoint_id: i64) -> bool {
        true
    }
}

/// Fire-and-forget mirror of scoring activity, e.g. to a spreadsheet.
/// Implementations must swallow their own errors; callers never see them.
pub trait SheetNotifier: Send + Sync {
    fn update_scores(
        &self,
        team_id: i64,
        checkpoint_id: i64,
        group_name: &str,
        values: &RawFields,
        scored_at: NaiveDateTime,
    );

    fn mark_arrival(&self, team_id: i64, checkpoint_id: i64, arrived_at: NaiveDateTime);
}

/// Discards every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

impl SheetNotifier for NullNotifier {
    fn update_scores(
        &self,
        _team_id: i64,
        _checkpoint_id: i64,
        _group_name: &str,
        _values: &RawFields,
        _scored_at: NaiveDateTime,
    ) {
    }

    fn mark_arrival(&self, _team_id: i64, _checkpoint_id: i64, _arrived_at: NaiveDateTime) {}
}

/// Logs every notification at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl SheetNotifier for LogNotifier {
    fn update_scores(
        &self,
        team_id: i64,
        checkpoint_id: i64,
        group_name: &str,
        values: &RawFields,
        scored_at: NaiveDateTime,
    ) {
        tracing::debug!(
            "Score update for team {} at checkpoint {} ({}): {} fields at {}",
            team_id,
            checkpoint_id,
            group_name,
            values.len(),
            scored_at
        );
    }

    fn mark_arrival(&self, team_id: i64, checkpoint_id: i64, arrived_at: NaiveDateTime) {
        tracing::debug!(
            "Team {} arrived at checkpoint {} at {}",
            team_id,
            checkpoint_id,
            arrived_at
        );
    }
}

/// Produces the digest written back to a team card after a fresh check-in.
/// The output is opaque to the scoring pipeline.
pub trait CardWriteback: Send + Sync {
    fn card_digest(&self, card_uid: &str, checkpoint_id: i64) -> Option<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_schema_group_name_is_case_insensitive() {
        let mut provider = StaticSchemaProvider::new();
        provider.insert(1, 2, "Alpha", FieldSchema::default());

        assert!(provider.fields(1, 2, "alpha").await.is_some());
        assert!(provider.fields(1, 2, "ALPHA").await.is_some());
        assert!(provider.fields(1, 3, "alpha").await.is_none());
    }

    #[test]
    fn test_allowed_keys_include_reserved_and_points_header() {
        let schema = FieldSchema {
            fields: vec![FieldDef {
                key: "hits".to_string(),
                label: "Hits".to_string(),
                field_type: "number".to_string(),
            }],
            headers: FieldHeaders {
                points: Some("Points".to_string()),
                ..FieldHeaders::default()
            },
        };
        let keys = schema.allowed_keys();
        for expected in ["hits", "points", "time", "dead_time", "Points"] {
            assert!(keys.iter().any(|k| k == expected), "missing {expected}");
        }
    }
}
