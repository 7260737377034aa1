//! End-to-end scoring flows over the in-memory store: rule management,
//! submissions, cohort recomputation and standings through the public
//! service API.

use std::sync::Arc;

use chrono::NaiveDateTime;
use serde_json::json;
use storage::dto::rules::SaveScoreRuleRequest;
use storage::dto::submission::{ResolveRequest, SubmitRequest};
use storage::repository::{CompetitionStore, MemoryStore};
use storage::services::rules::save_score_rule;
use storage::services::standings::standings;
use storage::services::submission::SubmissionService;
use storage::traits::{
    FieldDef, FieldHeaders, FieldSchema, NullNotifier, OpenGate, StaticSchemaProvider,
};

fn ts(minute: i64) -> NaiveDateTime {
    chrono::NaiveDate::from_ymd_opt(2025, 6, 14)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap()
        + chrono::Duration::minutes(minute)
}

fn number_field(key: &str) -> FieldDef {
    FieldDef {
        key: key.to_string(),
        label: key.to_string(),
        field_type: "number".to_string(),
    }
}

fn submit(
    competition_id: i64,
    checkpoint_id: i64,
    team_id: i64,
    doc: serde_json::Value,
) -> SubmitRequest {
    SubmitRequest {
        competition_id,
        checkpoint_id,
        team_id,
        card_uid: None,
        judge_id: None,
        fields: serde_json::from_value(doc).unwrap(),
    }
}

#[tokio::test]
async fn test_rule_scoring_and_explicit_override_flow() {
    let store = MemoryStore::new();
    let competition = store.create_competition("City Trophy");
    let range = store.create_checkpoint(competition.id, "Range");
    let alpha = store.create_group(competition.id, "Alpha", Some(1));
    store.link_checkpoint_to_group(range.id, alpha.id, Some(1));
    let team = store.create_team(competition.id, "Falcons", Some(1), None);
    store.add_card(team.id, "AA11");
    store.assign_team_group(team.id, alpha.id).await.unwrap();

    let mut schemas = StaticSchemaProvider::new();
    schemas.insert(
        competition.id,
        range.id,
        "Alpha",
        FieldSchema {
            fields: vec![number_field("targets")],
            headers: FieldHeaders::default(),
        },
    );
    let service = SubmissionService::new(
        store.clone(),
        Arc::new(schemas),
        Arc::new(OpenGate),
        Arc::new(NullNotifier),
    );

    save_score_rule(
        &store,
        &NullNotifier,
        &SaveScoreRuleRequest {
            competition_id: competition.id,
            checkpoint_id: range.id,
            group_id: alpha.id,
            rules: json!({"field_rules": {"targets": {"type": "multiplier", "factor": 20}}}),
        },
    )
    .await
    .unwrap();

    let first = service
        .submit(&submit(competition.id, range.id, team.id, json!({"targets": 2})))
        .await
        .unwrap();
    assert_eq!(first.total, Some(40.0));
    assert!(first.checkin_created);

    let resolution = service
        .resolve(&ResolveRequest {
            competition_id: competition.id,
            checkpoint_id: range.id,
            team_id: None,
            card_uid: Some("aa11".to_string()),
            judge_id: None,
        })
        .await
        .unwrap();
    assert_eq!(resolution.latest_total, Some(40.0));
    assert!(resolution.checkin_exists);
    assert!(resolution.rule.is_some());

    // A judge typing the score in beats anything the rule computes.
    let second = service
        .submit(&submit(
            competition.id,
            range.id,
            team.id,
            json!({"targets": 2, "points": 99}),
        ))
        .await
        .unwrap();
    assert_eq!(second.total, Some(99.0));
    assert!(!second.checkin_created);

    // The corrected entry replaced the first one in the index, not in the log.
    let latest = store
        .latest_entry(competition.id, team.id, range.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.id, second.entry_id);
    assert_ne!(first.entry_id, second.entry_id);

    // Replacing the rule recomputes the cohort, and the explicit score
    // still wins inside the recomputation.
    save_score_rule(
        &store,
        &NullNotifier,
        &SaveScoreRuleRequest {
            competition_id: competition.id,
            checkpoint_id: range.id,
            group_id: alpha.id,
            rules: json!({"field_rules": {"targets": {"type": "multiplier", "factor": 2}}}),
        },
    )
    .await
    .unwrap();
    let latest = store
        .latest_entry(competition.id, team.id, range.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.total, Some(99.0));
}

#[tokio::test]
async fn test_time_race_cohort_renormalizes_on_each_arrival() {
    let store = MemoryStore::new();
    let competition = store.create_competition("City Trophy");
    let start = store.create_checkpoint(competition.id, "Start");
    let finish = store.create_checkpoint(competition.id, "Finish");
    let alpha = store.create_group(competition.id, "Alpha", Some(1));
    store.link_checkpoint_to_group(start.id, alpha.id, Some(1));
    store.link_checkpoint_to_group(finish.id, alpha.id, Some(2));

    let falcons = store.create_team(competition.id, "Falcons", Some(1), None);
    let hawks = store.create_team(competition.id, "Hawks", Some(2), None);
    let owls = store.create_team(competition.id, "Owls", Some(3), None);
    for (team, finish_minute) in [(&falcons, 10), (&hawks, 20), (&owls, 30)] {
        store.assign_team_group(team.id, alpha.id).await.unwrap();
        store.record_checkin(competition.id, team.id, start.id, ts(0));
        store.record_checkin(competition.id, team.id, finish.id, ts(finish_minute));
    }

    save_score_rule(
        &store,
        &NullNotifier,
        &SaveScoreRuleRequest {
            competition_id: competition.id,
            checkpoint_id: finish.id,
            group_id: alpha.id,
            rules: json!({"time_race": {
                "start_checkpoint_id": start.id,
                "end_checkpoint_id": finish.id,
                "min_points": 0.0,
                "max_points": 100.0
            }}),
        },
    )
    .await
    .unwrap();

    let service = SubmissionService::new(
        store.clone(),
        Arc::new(StaticSchemaProvider::new()),
        Arc::new(OpenGate),
        Arc::new(NullNotifier),
    );

    // First finisher: alone in the race, so the scale collapses to max.
    let alone = service
        .submit(&submit(competition.id, finish.id, falcons.id, json!({})))
        .await
        .unwrap();
    assert_eq!(alone.total, Some(100.0));
    assert!(!alone.checkin_created);

    // Second finisher spreads the scale to its endpoints.
    let second = service
        .submit(&submit(competition.id, finish.id, hawks.id, json!({})))
        .await
        .unwrap();
    assert_eq!(second.total, Some(0.0));

    // The third arrival moves a total that was already stored: Hawks climb
    // from the bottom of the scale to the middle.
    let third = service
        .submit(&submit(competition.id, finish.id, owls.id, json!({})))
        .await
        .unwrap();
    assert_eq!(third.total, Some(0.0));
    for (team_id, expected) in [(falcons.id, 100.0), (hawks.id, 50.0), (owls.id, 0.0)] {
        let entry = store
            .latest_entry(competition.id, team_id, finish.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.total, Some(expected));
    }

    // The seeded check-in survives both of Falcons' submissions untouched.
    let checkin = store
        .find_checkin(competition.id, falcons.id, finish.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(checkin.timestamp, ts(10));
}

#[tokio::test]
async fn test_standings_after_a_full_day() {
    let store = MemoryStore::new();
    let competition = store.create_competition("City Trophy");
    let start = store.create_checkpoint(competition.id, "Start");
    let range = store.create_checkpoint(competition.id, "Range");
    let finish = store.create_checkpoint(competition.id, "Finish");
    let alpha = store.create_group(competition.id, "Alpha", Some(1));
    let bravo = store.create_group(competition.id, "Bravo", Some(2));
    store.link_checkpoint_to_group(start.id, alpha.id, Some(1));
    store.link_checkpoint_to_group(range.id, alpha.id, Some(2));
    store.link_checkpoint_to_group(finish.id, alpha.id, Some(3));
    store.link_checkpoint_to_group(start.id, bravo.id, Some(1));
    store.link_checkpoint_to_group(finish.id, bravo.id, Some(2));

    let falcons = store.create_team(competition.id, "Falcons", Some(1), Some("North Club"));
    let hawks = store.create_team(competition.id, "Hawks", Some(2), Some("South Club"));
    let owls = store.create_team(competition.id, "Owls", Some(3), Some("North Club"));
    store.assign_team_group(falcons.id, alpha.id).await.unwrap();
    store.assign_team_group(hawks.id, alpha.id).await.unwrap();
    store.assign_team_group(owls.id, bravo.id).await.unwrap();

    store
        .upsert_global_rule(
            competition.id,
            alpha.id,
            &json!({"found": {"points_per": 2.0}}),
        )
        .await
        .unwrap();

    let mut schemas = StaticSchemaProvider::new();
    for group in ["Alpha", "Bravo"] {
        schemas.insert(
            competition.id,
            range.id,
            group,
            FieldSchema {
                fields: vec![number_field("targets")],
                headers: FieldHeaders::default(),
            },
        );
    }
    let service = SubmissionService::new(
        store.clone(),
        Arc::new(schemas),
        Arc::new(OpenGate),
        Arc::new(NullNotifier),
    );

    store.record_checkin(competition.id, falcons.id, start.id, ts(0));
    store.record_checkin(competition.id, falcons.id, finish.id, ts(90));
    service
        .submit(&submit(
            competition.id,
            range.id,
            falcons.id,
            json!({"targets": 12, "dead_time": 5}),
        ))
        .await
        .unwrap();
    service
        .submit(&submit(competition.id, range.id, hawks.id, json!({"targets": 8})))
        .await
        .unwrap();
    // Owls visit a checkpoint outside their route; it must not count.
    service
        .submit(&submit(competition.id, range.id, owls.id, json!({"targets": 4})))
        .await
        .unwrap();

    let table = standings(&store, competition.id, None).await.unwrap();

    let summary: Vec<(&str, &str, u32, f64)> = table
        .rows
        .iter()
        .map(|row| {
            (
                row.name.as_str(),
                row.group_name.as_str(),
                row.place,
                row.total,
            )
        })
        .collect();
    // Falcons: 12 from the range plus 2 points for each of 3 visited
    // route checkpoints; Hawks: 8 plus 2 for the range itself.
    assert_eq!(
        summary,
        vec![
            ("Falcons", "Alpha", 1, 18.0),
            ("Hawks", "Alpha", 2, 10.0),
            ("Owls", "Bravo", 1, 0.0),
        ]
    );

    let falcons_row = &table.rows[0];
    assert_eq!(falcons_row.dead_time, 5.0);
    assert_eq!(falcons_row.global_found, 6.0);
    assert_eq!(falcons_row.time_minutes, Some(90.0));
    assert!(falcons_row.finished);
    assert!(!table.rows[1].finished);
    assert!(falcons_row.checkpoint_totals.contains_key(&range.id));
    assert!(!table.rows[2].checkpoint_totals.contains_key(&range.id));

    let groups: Vec<(&str, f64, u32)> = table
        .group_totals
        .iter()
        .map(|g| (g.name.as_str(), g.total, g.rank))
        .collect();
    assert_eq!(groups, vec![("Alpha", 28.0, 1), ("Bravo", 0.0, 2)]);
    let organizations: Vec<(&str, f64)> = table
        .organization_totals
        .iter()
        .map(|o| (o.name.as_str(), o.total))
        .collect();
    assert_eq!(organizations, vec![("North Club", 18.0), ("South Club", 10.0)]);

    let scoped = standings(&store, competition.id, Some(bravo.id)).await.unwrap();
    let names: Vec<&str> = scoped.rows.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["Owls"]);
}
