use scoring::POINTS_FIELD;

use crate::error::Result;
use crate::models::ScoreEntry;
use crate::repository::CompetitionStore;
use crate::traits::SheetNotifier;

/// Recompute the stored totals of a (checkpoint, group) cohort after its
/// rule changed.
///
/// A `time_race` rule runs the relative-race pass and touches only the
/// teams that completed the race window; any other rule (or none at all)
/// re-evaluates every current entry through the field path. Updated entries
/// are mirrored to the notifier after the store pass commits. Returns the
/// number of entries written.
pub async fn recompute_for_rule<S>(
    store: &S,
    notifier: &dyn SheetNotifier,
    competition_id: i64,
    checkpoint_id: i64,
    group_id: i64,
) -> Result<u64>
where
    S: CompetitionStore + ?Sized,
{
    let Some(group) = store.group(competition_id, group_id).await? else {
        return Ok(0);
    };

    let rule = match store
        .score_rule(competition_id, checkpoint_id, group_id)
        .await?
    {
        Some(row) => Some(row.spec()?),
        None => None,
    };

    let updated = match rule.as_ref().and_then(|spec| spec.time_race.as_ref()) {
        Some(time_race) => {
            store
                .renormalize_time_race(competition_id, checkpoint_id, group_id, time_race)
                .await?
        }
        None => {
            store
                .recompute_field_totals(competition_id, checkpoint_id, group_id, rule.as_ref())
                .await?
        }
    };

    for entry in &updated {
        notify_entry(notifier, entry, &group.name);
    }
    tracing::info!(
        "Recomputed {} totals at checkpoint {} for group '{}'",
        updated.len(),
        checkpoint_id,
        group.name
    );
    Ok(updated.len() as u64)
}

/// Mirror one entry to the notifier: the raw fields plus the stored total
/// under the `points` key, when there is one.
pub(crate) fn notify_entry(notifier: &dyn SheetNotifier, entry: &ScoreEntry, group_name: &str) {
    let mut values = entry.raw_fields.clone();
    if let Some(total) = entry.total {
        if let Some(number) = serde_json::Number::from_f64(total) {
            values.insert(POINTS_FIELD.to_string(), serde_json::Value::Number(number));
        }
    }
    notifier.update_scores(
        entry.team_id,
        entry.checkpoint_id,
        group_name,
        &values,
        entry.created_at,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryStore;
    use crate::traits::NullNotifier;
    use chrono::NaiveDateTime;
    use serde_json::json;

    fn ts(minute: i64) -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2025, 6, 14)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
            + chrono::Duration::minutes(minute)
    }

    async fn seed_entry(
        store: &MemoryStore,
        competition_id: i64,
        team_id: i64,
        checkpoint_id: i64,
        doc: serde_json::Value,
    ) {
        let checkin = store.record_checkin(competition_id, team_id, checkpoint_id, ts(0));
        store
            .append_entry(crate::models::NewScoreEntry {
                competition_id,
                checkin_id: checkin.id,
                team_id,
                checkpoint_id,
                judge_id: None,
                raw_fields: serde_json::from_value(doc).unwrap(),
                total: Some(1.0),
                created_at: ts(1),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_group_recomputes_nothing() {
        let store = MemoryStore::new();
        let competition = store.create_competition("City Trophy");
        let count = recompute_for_rule(&store, &NullNotifier, competition.id, 1, 999)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_field_rule_change_rewrites_every_cohort_total() {
        let store = MemoryStore::new();
        let competition = store.create_competition("City Trophy");
        let checkpoint = store.create_checkpoint(competition.id, "Range");
        let group = store.create_group(competition.id, "Alpha", None);
        store.link_checkpoint_to_group(checkpoint.id, group.id, None);

        let mut team_ids = Vec::new();
        for name in ["Falcons", "Hawks"] {
            let team = store.create_team(competition.id, name, None, None);
            store.assign_team_group(team.id, group.id).await.unwrap();
            seed_entry(&store, competition.id, team.id, checkpoint.id, json!({"hits": 4})).await;
            team_ids.push(team.id);
        }
        store
            .upsert_score_rule(
                competition.id,
                checkpoint.id,
                group.id,
                &json!({"field_rules": {"hits": {"type": "multiplier", "factor": 10}}}),
            )
            .await
            .unwrap();

        let count =
            recompute_for_rule(&store, &NullNotifier, competition.id, checkpoint.id, group.id)
                .await
                .unwrap();
        assert_eq!(count, 2);

        for team_id in team_ids {
            let entry = store
                .latest_entry(competition.id, team_id, checkpoint.id)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(entry.total, Some(40.0));
        }
    }

    #[tokio::test]
    async fn test_time_race_rule_touches_only_finishers() {
        let store = MemoryStore::new();
        let competition = store.create_competition("City Trophy");
        let checkpoint = store.create_checkpoint(competition.id, "Range");
        let start = store.create_checkpoint(competition.id, "Start");
        let finish = store.create_checkpoint(competition.id, "Finish");
        let group = store.create_group(competition.id, "Alpha", None);
        store.link_checkpoint_to_group(checkpoint.id, group.id, None);

        let racer = store.create_team(competition.id, "Falcons", None, None);
        let stray = store.create_team(competition.id, "Hawks", None, None);
        for team_id in [racer.id, stray.id] {
            store.assign_team_group(team_id, group.id).await.unwrap();
            seed_entry(&store, competition.id, team_id, checkpoint.id, json!({"hits": 4})).await;
        }
        store.record_checkin(competition.id, racer.id, start.id, ts(0));
        store.record_checkin(competition.id, racer.id, finish.id, ts(20));

        store
            .upsert_score_rule(
                competition.id,
                checkpoint.id,
                group.id,
                &json!({"time_race": {
                    "start_checkpoint_id": start.id,
                    "end_checkpoint_id": finish.id,
                    "min_points": 0.0,
                    "max_points": 50.0,
                }}),
            )
            .await
            .unwrap();

        let count =
            recompute_for_rule(&store, &NullNotifier, competition.id, checkpoint.id, group.id)
                .await
                .unwrap();
        assert_eq!(count, 1);

        let raced = store
            .latest_entry(competition.id, racer.id, checkpoint.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(raced.total, Some(50.0));
        let kept = store
            .latest_entry(competition.id, stray.id, checkpoint.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(kept.total, Some(1.0));
    }
}
