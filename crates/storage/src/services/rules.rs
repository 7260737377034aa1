use scoring::{GlobalRuleSpec, ScoreRuleSpec};
use validator::Validate;

use crate::dto::rules::{SaveGlobalRuleRequest, SaveScoreRuleRequest};
use crate::error::{Result, StorageError};
use crate::models::{GlobalScoreRule, ScoreRule};
use crate::repository::CompetitionStore;
use crate::services::recompute::recompute_for_rule;
use crate::traits::SheetNotifier;

/// Create or replace the scoring rule for one (checkpoint, group) pair and
/// recompute the cohort's stored totals under it. The rule row is committed
/// before the recomputation runs, so a recompute failure leaves the new rule
/// in place and the caller retries the recompute.
pub async fn save_score_rule<S>(
    store: &S,
    notifier: &dyn SheetNotifier,
    request: &SaveScoreRuleRequest,
) -> Result<ScoreRule>
where
    S: CompetitionStore + ?Sized,
{
    request
        .validate()
        .map_err(|e| StorageError::Validation(e.to_string()))?;
    if store
        .checkpoint(request.competition_id, request.checkpoint_id)
        .await?
        .is_none()
    {
        return Err(StorageError::Validation(
            "checkpoint does not belong to this competition".to_string(),
        ));
    }
    if store
        .group(request.competition_id, request.group_id)
        .await?
        .is_none()
    {
        return Err(StorageError::Validation(
            "group does not belong to this competition".to_string(),
        ));
    }
    ScoreRuleSpec::parse(request.rules.clone())?;

    let rule = store
        .upsert_score_rule(
            request.competition_id,
            request.checkpoint_id,
            request.group_id,
            &request.rules,
        )
        .await?;
    tracing::info!(
        "Saved score rule {} for checkpoint {} group {}",
        rule.id,
        rule.checkpoint_id,
        rule.group_id
    );
    recompute_for_rule(
        store,
        notifier,
        request.competition_id,
        request.checkpoint_id,
        request.group_id,
    )
    .await?;
    Ok(rule)
}

/// Create or replace a group's global rule. Global rules are evaluated live
/// by the standings, so no stored totals change here.
pub async fn save_global_rule<S>(
    store: &S,
    request: &SaveGlobalRuleRequest,
) -> Result<GlobalScoreRule>
where
    S: CompetitionStore + ?Sized,
{
    request
        .validate()
        .map_err(|e| StorageError::Validation(e.to_string()))?;
    if store
        .group(request.competition_id, request.group_id)
        .await?
        .is_none()
    {
        return Err(StorageError::Validation(
            "group does not belong to this competition".to_string(),
        ));
    }
    GlobalRuleSpec::parse(request.rules.clone())?;

    let rule = store
        .upsert_global_rule(request.competition_id, request.group_id, &request.rules)
        .await?;
    tracing::info!("Saved global rule {} for group {}", rule.id, rule.group_id);
    Ok(rule)
}

/// Delete a checkpoint rule by id. Stored totals keep their last computed
/// values; only the next rule save recomputes them.
pub async fn delete_score_rule<S>(store: &S, competition_id: i64, rule_id: i64) -> Result<()>
where
    S: CompetitionStore + ?Sized,
{
    store.delete_score_rule(competition_id, rule_id).await
}

pub async fn delete_global_rule<S>(store: &S, competition_id: i64, rule_id: i64) -> Result<()>
where
    S: CompetitionStore + ?Sized,
{
    store.delete_global_rule(competition_id, rule_id).await
}

pub async fn list_score_rules<S>(store: &S, competition_id: i64) -> Result<Vec<ScoreRule>>
where
    S: CompetitionStore + ?Sized,
{
    store.list_score_rules(competition_id).await
}

pub async fn list_global_rules<S>(store: &S, competition_id: i64) -> Result<Vec<GlobalScoreRule>>
where
    S: CompetitionStore + ?Sized,
{
    store.list_global_rules(competition_id).await
}
