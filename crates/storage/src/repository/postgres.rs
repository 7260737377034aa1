use chrono::NaiveDateTime;
use scoring::{
    CheckinSnapshot, EvalContext, RawFields, ScoreRuleSpec, TimeRaceRule, compute_total,
    race_durations, relative_race_scores,
};
use sqlx::types::Json;
use sqlx::{FromRow, PgConnection, PgPool, QueryBuilder};

use crate::error::{Result, StorageError};
use crate::models::{
    Checkin, Checkpoint, CheckpointGroup, GlobalScoreRule, NewScoreEntry, ScoreEntry, ScoreRule,
    Team, TeamGroup, normalize_card_uid,
};
use crate::repository::CompetitionStore;

/// Postgres-backed [`CompetitionStore`]. Both recompute passes run in a
/// single transaction with the cohort's entry rows locked, so concurrent
/// submissions into the same cohort serialize instead of overwriting each
/// other's normalized totals.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct ScoreEntryRow {
    id: i64,
    competition_id: i64,
    checkin_id: i64,
    team_id: i64,
    checkpoint_id: i64,
    judge_id: Option<i64>,
    raw_fields: Json<RawFields>,
    total: Option<f64>,
    created_at: NaiveDateTime,
}

impl From<ScoreEntryRow> for ScoreEntry {
    fn from(row: ScoreEntryRow) -> Self {
        Self {
            id: row.id,
            competition_id: row.competition_id,
            checkin_id: row.checkin_id,
            team_id: row.team_id,
            checkpoint_id: row.checkpoint_id,
            judge_id: row.judge_id,
            raw_fields: row.raw_fields.0,
            total: row.total,
            created_at: row.created_at,
        }
    }
}

/// The cohort of a (checkpoint, group) pair: current entries of the group's
/// active members, locked for the rest of the transaction.
async fn cohort_entries(
    conn: &mut PgConnection,
    competition_id: i64,
    checkpoint_id: i64,
    group_id: i64,
) -> Result<Vec<ScoreEntry>> {
    let rows = sqlx::query_as::<_, ScoreEntryRow>(
        r#"
        SELECT e.id, e.competition_id, e.checkin_id, e.team_id, e.checkpoint_id,
               e.judge_id, e.raw_fields, e.total, e.created_at
        FROM score_entries e
        JOIN score_entry_latest l ON l.entry_id = e.id
        JOIN team_groups tg ON tg.team_id = l.team_id AND tg.active
        WHERE l.competition_id = $1 AND l.checkpoint_id = $2 AND tg.group_id = $3
        ORDER BY e.team_id
        FOR UPDATE OF e
        "#,
    )
    .bind(competition_id)
    .bind(checkpoint_id)
    .bind(group_id)
    .fetch_all(conn)
    .await?;

    Ok(rows.into_iter().map(Into::into).collect())
}

async fn snapshot_for(
    conn: &mut PgConnection,
    competition_id: i64,
    team_ids: &[i64],
) -> Result<CheckinSnapshot> {
    let rows = sqlx::query_as::<_, (i64, i64, NaiveDateTime)>(
        r#"
        SELECT team_id, checkpoint_id, MIN(timestamp)
        FROM checkins
        WHERE competition_id = $1 AND team_id = ANY($2)
        GROUP BY team_id, checkpoint_id
        "#,
    )
    .bind(competition_id)
    .bind(team_ids)
    .fetch_all(conn)
    .await?;

    let mut snapshot = CheckinSnapshot::new();
    for (team_id, checkpoint_id, at) in rows {
        snapshot.record(team_id, checkpoint_id, at);
    }
    Ok(snapshot)
}

#[async_trait::async_trait]
impl CompetitionStore for PgStore {
    async fn checkpoint(
        &self,
        competition_id: i64,
        checkpoint_id: i64,
    ) -> Result<Option<Checkpoint>> {
        let checkpoint = sqlx::query_as::<_, Checkpoint>(
            r#"
            SELECT id, competition_id, name, location
            FROM checkpoints
            WHERE competition_id = $1 AND id = $2
            "#,
        )
        .bind(competition_id)
        .bind(checkpoint_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(checkpoint)
    }

    async fn team(&self, competition_id: i64, team_id: i64) -> Result<Option<Team>> {
        let team = sqlx::query_as::<_, Team>(
            r#"
            SELECT id, competition_id, name, number, organization, dnf
            FROM teams
            WHERE competition_id = $1 AND id = $2
            "#,
        )
        .bind(competition_id)
        .bind(team_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(team)
    }

    async fn team_by_card_uid(
        &self,
        competition_id: i64,
        card_uid: &str,
    ) -> Result<Option<Team>> {
        let team = sqlx::query_as::<_, Team>(
            r#"
            SELECT t.id, t.competition_id, t.name, t.number, t.organization, t.dnf
            FROM teams t
            JOIN team_cards c ON c.team_id = t.id
            WHERE t.competition_id = $1 AND c.uid = $2
            "#,
        )
        .bind(competition_id)
        .bind(normalize_card_uid(card_uid))
        .fetch_optional(&self.pool)
        .await?;

        Ok(team)
    }

    async fn group(&self, competition_id: i64, group_id: i64) -> Result<Option<CheckpointGroup>> {
        let group = sqlx::query_as::<_, CheckpointGroup>(
            r#"
            SELECT id, competition_id, name, description, position
            FROM checkpoint_groups
            WHERE competition_id = $1 AND id = $2
            "#,
        )
        .bind(competition_id)
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(group)
    }

    async fn active_group(&self, team_id: i64) -> Result<Option<CheckpointGroup>> {
        let group = sqlx::query_as::<_, CheckpointGroup>(
            r#"
            SELECT g.id, g.competition_id, g.name, g.description, g.position
            FROM checkpoint_groups g
            JOIN team_groups tg ON tg.group_id = g.id
            WHERE tg.team_id = $1 AND tg.active
            "#,
        )
        .bind(team_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(group)
    }

    async fn list_teams(&self, competition_id: i64, group_id: Option<i64>) -> Result<Vec<Team>> {
        let mut query = QueryBuilder::new(
            "SELECT t.id, t.competition_id, t.name, t.number, t.organization, t.dnf FROM teams t",
        );

        if let Some(group_id) = group_id {
            query
                .push(" JOIN team_groups tg ON tg.team_id = t.id AND tg.active AND tg.group_id = ");
            query.push_bind(group_id);
        }

        query.push(" WHERE t.competition_id = ");
        query.push_bind(competition_id);
        query.push(" ORDER BY t.number ASC NULLS LAST, t.name ASC");

        let teams: Vec<Team> = query.build_query_as().fetch_all(&self.pool).await?;

        Ok(teams)
    }

    async fn list_groups(&self, competition_id: i64) -> Result<Vec<CheckpointGroup>> {
        let groups = sqlx::query_as::<_, CheckpointGroup>(
            r#"
            SELECT id, competition_id, name, description, position
            FROM checkpoint_groups
            WHERE competition_id = $1
            ORDER BY position ASC NULLS LAST, name ASC
            "#,
        )
        .bind(competition_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(groups)
    }

    async fn group_checkpoints(&self, group_id: i64) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT checkpoint_id
            FROM checkpoint_group_links
            WHERE group_id = $1
            ORDER BY position ASC NULLS LAST, checkpoint_id ASC
            "#,
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn active_memberships(&self, competition_id: i64) -> Result<Vec<TeamGroup>> {
        let memberships = sqlx::query_as::<_, TeamGroup>(
            r#"
            SELECT tg.id, tg.team_id, tg.group_id, tg.active
            FROM team_groups tg
            JOIN teams t ON t.id = tg.team_id
            WHERE t.competition_id = $1 AND tg.active
            "#,
        )
        .bind(competition_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(memberships)
    }

    async fn assign_team_group(&self, team_id: i64, group_id: i64) -> Result<TeamGroup> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE team_groups
            SET active = FALSE
            WHERE team_id = $1 AND active AND group_id <> $2
            "#,
        )
        .bind(team_id)
        .bind(group_id)
        .execute(&mut *tx)
        .await?;

        let membership = sqlx::query_as::<_, TeamGroup>(
            r#"
            INSERT INTO team_groups (team_id, group_id, active)
            VALUES ($1, $2, TRUE)
            ON CONFLICT (team_id, group_id) DO UPDATE SET active = TRUE
            RETURNING id, team_id, group_id, active
            "#,
        )
        .bind(team_id)
        .bind(group_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(membership)
    }

    async fn find_checkin(
        &self,
        competition_id: i64,
        team_id: i64,
        checkpoint_id: i64,
    ) -> Result<Option<Checkin>> {
        let checkin = sqlx::query_as::<_, Checkin>(
            r#"
            SELECT id, competition_id, team_id, checkpoint_id, timestamp
            FROM checkins
            WHERE competition_id = $1 AND team_id = $2 AND checkpoint_id = $3
            "#,
        )
        .bind(competition_id)
        .bind(team_id)
        .bind(checkpoint_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(checkin)
    }

    async fn ensure_checkin(
        &self,
        competition_id: i64,
        team_id: i64,
        checkpoint_id: i64,
        at: NaiveDateTime,
    ) -> Result<(Checkin, bool)> {
        let inserted = sqlx::query_as::<_, Checkin>(
            r#"
            INSERT INTO checkins (competition_id, team_id, checkpoint_id, timestamp)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (team_id, checkpoint_id) DO NOTHING
            RETURNING id, competition_id, team_id, checkpoint_id, timestamp
            "#,
        )
        .bind(competition_id)
        .bind(team_id)
        .bind(checkpoint_id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(checkin) = inserted {
            return Ok((checkin, true));
        }

        let existing = sqlx::query_as::<_, Checkin>(
            r#"
            SELECT id, competition_id, team_id, checkpoint_id, timestamp
            FROM checkins
            WHERE team_id = $1 AND checkpoint_id = $2
            "#,
        )
        .bind(team_id)
        .bind(checkpoint_id)
        .fetch_one(&self.pool)
        .await?;

        Ok((existing, false))
    }

    async fn checkin_snapshot(
        &self,
        competition_id: i64,
        team_ids: &[i64],
    ) -> Result<CheckinSnapshot> {
        let mut conn = self.pool.acquire().await?;
        snapshot_for(&mut conn, competition_id, team_ids).await
    }

    async fn score_rule(
        &self,
        competition_id: i64,
        checkpoint_id: i64,
        group_id: i64,
    ) -> Result<Option<ScoreRule>> {
        let rule = sqlx::query_as::<_, ScoreRule>(
            r#"
            SELECT id, competition_id, checkpoint_id, group_id, rules, created_at
            FROM score_rules
            WHERE competition_id = $1 AND checkpoint_id = $2 AND group_id = $3
            "#,
        )
        .bind(competition_id)
        .bind(checkpoint_id)
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(rule)
    }

    async fn upsert_score_rule(
        &self,
        competition_id: i64,
        checkpoint_id: i64,
        group_id: i64,
        rules: &serde_json::Value,
    ) -> Result<ScoreRule> {
        let rule = sqlx::query_as::<_, ScoreRule>(
            r#"
            INSERT INTO score_rules (competition_id, checkpoint_id, group_id, rules)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (competition_id, checkpoint_id, group_id)
                DO UPDATE SET rules = EXCLUDED.rules
            RETURNING id, competition_id, checkpoint_id, group_id, rules, created_at
            "#,
        )
        .bind(competition_id)
        .bind(checkpoint_id)
        .bind(group_id)
        .bind(rules)
        .fetch_one(&self.pool)
        .await?;

        Ok(rule)
    }

    async fn delete_score_rule(&self, competition_id: i64, rule_id: i64) -> Result<()> {
        let result = sqlx::query(
            r#"
            DELETE FROM score_rules
            WHERE id = $1 AND competition_id = $2
            "#,
        )
        .bind(rule_id)
        .bind(competition_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }

        Ok(())
    }

    async fn list_score_rules(&self, competition_id: i64) -> Result<Vec<ScoreRule>> {
        let rules = sqlx::query_as::<_, ScoreRule>(
            r#"
            SELECT id, competition_id, checkpoint_id, group_id, rules, created_at
            FROM score_rules
            WHERE competition_id = $1
            ORDER BY checkpoint_id ASC, group_id ASC
            "#,
        )
        .bind(competition_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rules)
    }

    async fn global_rule(
        &self,
        competition_id: i64,
        group_id: i64,
    ) -> Result<Option<GlobalScoreRule>> {
        let rule = sqlx::query_as::<_, GlobalScoreRule>(
            r#"
            SELECT id, competition_id, group_id, rules, created_at
            FROM global_score_rules
            WHERE competition_id = $1 AND group_id = $2
            "#,
        )
        .bind(competition_id)
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(rule)
    }

    async fn upsert_global_rule(
        &self,
        competition_id: i64,
        group_id: i64,
        rules: &serde_json::Value,
    ) -> Result<GlobalScoreRule> {
        let rule = sqlx::query_as::<_, GlobalScoreRule>(
            r#"
            INSERT INTO global_score_rules (competition_id, group_id, rules)
            VALUES ($1, $2, $3)
            ON CONFLICT (competition_id, group_id)
                DO UPDATE SET rules = EXCLUDED.rules
            RETURNING id, competition_id, group_id, rules, created_at
            "#,
        )
        .bind(competition_id)
        .bind(group_id)
        .bind(rules)
        .fetch_one(&self.pool)
        .await?;

        Ok(rule)
    }

    async fn delete_global_rule(&self, competition_id: i64, rule_id: i64) -> Result<()> {
        let result = sqlx::query(
            r#"
            DELETE FROM global_score_rules
            WHERE id = $1 AND competition_id = $2
            "#,
        )
        .bind(rule_id)
        .bind(competition_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }

        Ok(())
    }

    async fn list_global_rules(&self, competition_id: i64) -> Result<Vec<GlobalScoreRule>> {
        let rules = sqlx::query_as::<_, GlobalScoreRule>(
            r#"
            SELECT id, competition_id, group_id, rules, created_at
            FROM global_score_rules
            WHERE competition_id = $1
            ORDER BY group_id ASC
            "#,
        )
        .bind(competition_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rules)
    }

    async fn latest_entry(
        &self,
        competition_id: i64,
        team_id: i64,
        checkpoint_id: i64,
    ) -> Result<Option<ScoreEntry>> {
        let row = sqlx::query_as::<_, ScoreEntryRow>(
            r#"
            SELECT e.id, e.competition_id, e.checkin_id, e.team_id, e.checkpoint_id,
                   e.judge_id, e.raw_fields, e.total, e.created_at
            FROM score_entries e
            JOIN score_entry_latest l ON l.entry_id = e.id
            WHERE l.competition_id = $1 AND l.team_id = $2 AND l.checkpoint_id = $3
            "#,
        )
        .bind(competition_id)
        .bind(team_id)
        .bind(checkpoint_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn append_entry(&self, entry: NewScoreEntry) -> Result<ScoreEntry> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, ScoreEntryRow>(
            r#"
            INSERT INTO score_entries
                (competition_id, checkin_id, team_id, checkpoint_id, judge_id,
                 raw_fields, total, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, competition_id, checkin_id, team_id, checkpoint_id,
                      judge_id, raw_fields, total, created_at
            "#,
        )
        .bind(entry.competition_id)
        .bind(entry.checkin_id)
        .bind(entry.team_id)
        .bind(entry.checkpoint_id)
        .bind(entry.judge_id)
        .bind(Json(&entry.raw_fields))
        .bind(entry.total)
        .bind(entry.created_at)
        .fetch_one(&mut *tx)
        .await?;

        // The index only moves forward; a concurrent writer that already
        // landed a later (created_at, id) keeps the spot.
        sqlx::query(
            r#"
            INSERT INTO score_entry_latest
                (competition_id, team_id, checkpoint_id, entry_id, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (competition_id, team_id, checkpoint_id) DO UPDATE
                SET entry_id = EXCLUDED.entry_id, created_at = EXCLUDED.created_at
                WHERE (EXCLUDED.created_at, EXCLUDED.entry_id)
                    > (score_entry_latest.created_at, score_entry_latest.entry_id)
            "#,
        )
        .bind(row.competition_id)
        .bind(row.team_id)
        .bind(row.checkpoint_id)
        .bind(row.id)
        .bind(row.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row.into())
    }

    async fn latest_entries_for_teams(
        &self,
        competition_id: i64,
        team_ids: &[i64],
    ) -> Result<Vec<ScoreEntry>> {
        let rows = sqlx::query_as::<_, ScoreEntryRow>(
            r#"
            SELECT e.id, e.competition_id, e.checkin_id, e.team_id, e.checkpoint_id,
                   e.judge_id, e.raw_fields, e.total, e.created_at
            FROM score_entries e
            JOIN score_entry_latest l ON l.entry_id = e.id
            WHERE l.competition_id = $1 AND l.team_id = ANY($2)
            ORDER BY e.team_id ASC, e.checkpoint_id ASC
            "#,
        )
        .bind(competition_id)
        .bind(team_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn renormalize_time_race(
        &self,
        competition_id: i64,
        checkpoint_id: i64,
        group_id: i64,
        rule: &TimeRaceRule,
    ) -> Result<Vec<ScoreEntry>> {
        let Some((start_id, end_id)) = rule.endpoints() else {
            return Ok(Vec::new());
        };

        let mut tx = self.pool.begin().await?;
        let mut entries =
            cohort_entries(&mut tx, competition_id, checkpoint_id, group_id).await?;
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let team_ids: Vec<i64> = entries.iter().map(|entry| entry.team_id).collect();
        let snapshot = snapshot_for(&mut tx, competition_id, &team_ids).await?;
        let durations = race_durations(&team_ids, &snapshot, start_id, end_id);
        let scores = relative_race_scores(&durations, rule.min_points, rule.max_points);

        let mut updated = Vec::with_capacity(scores.len());
        for entry in entries.iter_mut() {
            let Some(score) = scores.get(&entry.team_id) else {
                continue;
            };
            entry.total = Some(*score);
            sqlx::query("UPDATE score_entries SET total = $2 WHERE id = $1")
                .bind(entry.id)
                .bind(entry.total)
                .execute(&mut *tx)
                .await?;
            updated.push(entry.clone());
        }

        tx.commit().await?;
        Ok(updated)
    }

    async fn recompute_field_totals(
        &self,
        competition_id: i64,
        checkpoint_id: i64,
        group_id: i64,
        rule: Option<&ScoreRuleSpec>,
    ) -> Result<Vec<ScoreEntry>> {
        let mut tx = self.pool.begin().await?;
        let mut entries =
            cohort_entries(&mut tx, competition_id, checkpoint_id, group_id).await?;
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let team_ids: Vec<i64> = entries.iter().map(|entry| entry.team_id).collect();
        let snapshot = snapshot_for(&mut tx, competition_id, &team_ids).await?;

        for entry in entries.iter_mut() {
            let ctx = EvalContext {
                competition_id,
                team_id: entry.team_id,
                checkins: &snapshot,
            };
            entry.total = compute_total(&entry.raw_fields, None, rule, &ctx);
            sqlx::query("UPDATE score_entries SET total = $2 WHERE id = $1")
                .bind(entry.id)
                .bind(entry.total)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(entries)
    }
}
