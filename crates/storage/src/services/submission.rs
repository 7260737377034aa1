use std::sync::Arc;

use chrono::Utc;
use scoring::{compute_total, EvalContext, RawFields, DEAD_TIME_FIELD, POINTS_FIELD};
use validator::Validate;

use crate::dto::submission::{ResolveRequest, Resolution, SubmitOutcome, SubmitRequest};
use crate::error::{Result, StorageError};
use crate::models::{normalize_card_uid, NewScoreEntry, Team};
use crate::repository::CompetitionStore;
use crate::services::recompute::notify_entry;
use crate::traits::{
    AuthorizationGate, CardWriteback, FieldDef, FieldSchema, FieldSchemaProvider, SheetNotifier,
};

/// Scoring front door: resolves who is being scored and records entries.
///
/// `resolve` is the judge's read-only preflight; `submit` is the write path.
/// Both run the same reference checks in the same order, so a submission
/// that follows a successful resolve only fails on data that changed in
/// between.
pub struct SubmissionService<S> {
    store: S,
    schemas: Arc<dyn FieldSchemaProvider>,
    gate: Arc<dyn AuthorizationGate>,
    notifier: Arc<dyn SheetNotifier>,
    writeback: Option<Arc<dyn CardWriteback>>,
}

impl<S: CompetitionStore> SubmissionService<S> {
    pub fn new(
        store: S,
        schemas: Arc<dyn FieldSchemaProvider>,
        gate: Arc<dyn AuthorizationGate>,
        notifier: Arc<dyn SheetNotifier>,
    ) -> Self {
        Self {
            store,
            schemas,
            gate,
            notifier,
            writeback: None,
        }
    }

    pub fn with_card_writeback(mut self, writeback: Arc<dyn CardWriteback>) -> Self {
        self.writeback = Some(writeback);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Resolve a card scan (or picked team) into the entry form and the
    /// team's current score state at this checkpoint. Read-only.
    pub async fn resolve(&self, request: &ResolveRequest) -> Result<Resolution> {
        request
            .validate()
            .map_err(|e| StorageError::Validation(e.to_string()))?;
        request
            .validate_target()
            .map_err(|msg| StorageError::Validation(msg.to_string()))?;

        let checkpoint = self
            .store
            .checkpoint(request.competition_id, request.checkpoint_id)
            .await?
            .ok_or(StorageError::NotFound)?;

        if !self.gate.can_score(request.judge_id, checkpoint.id).await {
            return Err(StorageError::Forbidden(
                "checkpoint not assigned".to_string(),
            ));
        }

        let team = self.resolve_team(request).await?;

        let group = self
            .store
            .active_group(team.id)
            .await?
            .ok_or_else(|| StorageError::Validation("team has no active group".to_string()))?;

        let schema = self
            .schemas
            .fields(request.competition_id, checkpoint.id, &group.name)
            .await
            .ok_or_else(|| {
                StorageError::Validation(
                    "no scoring fields configured for this checkpoint".to_string(),
                )
            })?;
        let fields = entry_fields(&schema);

        let latest = self
            .store
            .latest_entry(request.competition_id, team.id, checkpoint.id)
            .await?;
        let checkin_exists = self
            .store
            .find_checkin(request.competition_id, team.id, checkpoint.id)
            .await?
            .is_some();

        let rule = match self
            .store
            .score_rule(request.competition_id, checkpoint.id, group.id)
            .await?
        {
            Some(row) => Some(row.spec()?),
            None => None,
        };

        let (latest_fields, latest_total) = match latest {
            Some(entry) => (Some(entry.raw_fields), entry.total),
            None => (None, None),
        };
        Ok(Resolution {
            team: team.into(),
            checkpoint: checkpoint.into(),
            group_name: group.name,
            fields,
            latest_fields,
            latest_total,
            checkin_exists,
            rule,
        })
    }

    /// Record one score entry: ensure the check-in, compute the total,
    /// append, and renormalize the cohort when a time race governs the
    /// checkpoint.
    pub async fn submit(&self, request: &SubmitRequest) -> Result<SubmitOutcome> {
        request
            .validate()
            .map_err(|e| StorageError::Validation(e.to_string()))?;

        let team = self
            .store
            .team(request.competition_id, request.team_id)
            .await?;
        let checkpoint = self
            .store
            .checkpoint(request.competition_id, request.checkpoint_id)
            .await?;
        let (Some(team), Some(checkpoint)) = (team, checkpoint) else {
            return Err(StorageError::Validation(
                "invalid team or checkpoint".to_string(),
            ));
        };

        if !self.gate.can_score(request.judge_id, checkpoint.id).await {
            return Err(StorageError::Forbidden(
                "checkpoint not assigned".to_string(),
            ));
        }

        let group = self
            .store
            .active_group(team.id)
            .await?
            .ok_or_else(|| StorageError::Validation("team has no active group".to_string()))?;

        // Unlike resolve, submit tolerates a missing schema: points-only
        // checkpoints accept bare submissions.
        let schema = self
            .schemas
            .fields(request.competition_id, checkpoint.id, &group.name)
            .await;
        if let Some(schema) = &schema {
            validate_field_keys(&request.fields, schema)?;
        }
        let points_header = schema.as_ref().and_then(|s| s.headers.points.clone());

        let rule = match self
            .store
            .score_rule(request.competition_id, checkpoint.id, group.id)
            .await?
        {
            Some(row) => Some(row.spec()?),
            None => None,
        };

        let now = Utc::now().naive_utc();
        let (checkin, checkin_created) = self
            .store
            .ensure_checkin(request.competition_id, team.id, checkpoint.id, now)
            .await?;
        if checkin_created {
            self.notifier
                .mark_arrival(team.id, checkpoint.id, checkin.timestamp);
        }

        // Snapshot after the check-in so found-style rules see this visit.
        let snapshot = self
            .store
            .checkin_snapshot(request.competition_id, &[team.id])
            .await?;
        let ctx = EvalContext {
            competition_id: request.competition_id,
            team_id: team.id,
            checkins: &snapshot,
        };
        let total = compute_total(&request.fields, points_header.as_deref(), rule.as_ref(), &ctx);

        let entry = self
            .store
            .append_entry(NewScoreEntry {
                competition_id: request.competition_id,
                checkin_id: checkin.id,
                team_id: team.id,
                checkpoint_id: checkpoint.id,
                judge_id: request.judge_id,
                raw_fields: request.fields.clone(),
                total,
                created_at: now,
            })
            .await?;
        tracing::info!(
            "Recorded entry {} for team {} at checkpoint {} (total {:?})",
            entry.id,
            team.id,
            checkpoint.id,
            entry.total
        );
        notify_entry(self.notifier.as_ref(), &entry, &group.name);

        let mut total = entry.total;
        if let Some(time_race) = rule.as_ref().and_then(|spec| spec.time_race.as_ref()) {
            let updated = self
                .store
                .renormalize_time_race(request.competition_id, checkpoint.id, group.id, time_race)
                .await?;
            for raced in &updated {
                notify_entry(self.notifier.as_ref(), raced, &group.name);
                if raced.team_id == team.id {
                    total = raced.total;
                }
            }
        }

        let card_digest = self.card_digest(request, checkpoint.id, checkin_created);
        Ok(SubmitOutcome {
            entry_id: entry.id,
            total,
            checkin_created,
            card_digest,
        })
    }

    async fn resolve_team(&self, request: &ResolveRequest) -> Result<Team> {
        let uid = request
            .card_uid
            .as_deref()
            .map(normalize_card_uid)
            .filter(|uid| !uid.is_empty());
        if let Some(uid) = uid {
            return self
                .store
                .team_by_card_uid(request.competition_id, &uid)
                .await?
                .ok_or(StorageError::NotFound);
        }
        let team_id = request.team_id.ok_or_else(|| {
            StorageError::Validation("card_uid or team_id is required".to_string())
        })?;
        self.store
            .team(request.competition_id, team_id)
            .await?
            .ok_or(StorageError::NotFound)
    }

    fn card_digest(
        &self,
        request: &SubmitRequest,
        checkpoint_id: i64,
        checkin_created: bool,
    ) -> Option<String> {
        if !checkin_created {
            return None;
        }
        let writeback = self.writeback.as_ref()?;
        let uid = request
            .card_uid
            .as_deref()
            .map(normalize_card_uid)
            .filter(|uid| !uid.is_empty())?;
        writeback.card_digest(&uid, checkpoint_id)
    }
}

/// The entry form for one checkpoint: an optional dead-time field first,
/// then the schema's fields. A schema with nothing scorable gets an
/// implicit `points` field so the judge can still enter a score.
fn entry_fields(schema: &FieldSchema) -> Vec<FieldDef> {
    let mut fields = Vec::with_capacity(schema.fields.len() + 2);
    if let Some(label) = &schema.headers.dead_time {
        let label = if label.trim().is_empty() {
            "Dead Time"
        } else {
            label.as_str()
        };
        fields.push(FieldDef {
            key: DEAD_TIME_FIELD.to_string(),
            label: label.to_string(),
            field_type: "number".to_string(),
        });
    }
    fields.extend(schema.fields.iter().cloned());

    let has_score_input = fields
        .iter()
        .any(|f| f.key == "score" || f.key == POINTS_FIELD);
    let has_scored_fields = fields.iter().any(|f| f.key != DEAD_TIME_FIELD);
    if !has_score_input && !has_scored_fields {
        fields.push(FieldDef {
            key: POINTS_FIELD.to_string(),
            label: "Score".to_string(),
            field_type: "number".to_string(),
        });
    }
    fields
}

fn validate_field_keys(fields: &RawFields, schema: &FieldSchema) -> Result<()> {
    let allowed = schema.allowed_keys();
    for key in fields.keys() {
        if !allowed.iter().any(|allowed_key| allowed_key == key) {
            return Err(StorageError::Validation(format!(
                "field '{key}' is not part of this checkpoint's schema"
            )));
        }
    }
    Ok(())
}
