mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use chrono::NaiveDateTime;
use scoring::{CheckinSnapshot, ScoreRuleSpec, TimeRaceRule};

use crate::error::Result;
use crate::models::{
    Checkin, Checkpoint, CheckpointGroup, GlobalScoreRule, NewScoreEntry, ScoreEntry, ScoreRule,
    Team, TeamGroup,
};

/// Persistence surface for one competition's scoring state.
///
/// Lookups return `Ok(None)` for rows that simply are not there; the error
/// taxonomy (NotFound vs Validation) is chosen by the services. The two
/// recompute passes are store primitives so each backend can make
/// read-cohort → compute → write-totals atomic its own way.
#[async_trait::async_trait]
pub trait CompetitionStore: Send + Sync {
    async fn checkpoint(&self, competition_id: i64, checkpoint_id: i64)
        -> Result<Option<Checkpoint>>;

    async fn team(&self, competition_id: i64, team_id: i64) -> Result<Option<Team>>;

    /// Look a team up by one of its cards. The UID is matched in its
    /// normalized form.
    async fn team_by_card_uid(&self, competition_id: i64, card_uid: &str)
        -> Result<Option<Team>>;

    async fn group(&self, competition_id: i64, group_id: i64) -> Result<Option<CheckpointGroup>>;

    /// The group behind a team's active membership, if it has one.
    async fn active_group(&self, team_id: i64) -> Result<Option<CheckpointGroup>>;

    /// Teams of a competition ordered by (number, name), optionally narrowed
    /// to the active members of one group.
    async fn list_teams(&self, competition_id: i64, group_id: Option<i64>) -> Result<Vec<Team>>;

    /// Groups ordered by (position, name); unpositioned groups sort last.
    async fn list_groups(&self, competition_id: i64) -> Result<Vec<CheckpointGroup>>;

    /// Member checkpoint ids of a group in route order; unpositioned links
    /// sort last, ties break on checkpoint id.
    async fn group_checkpoints(&self, group_id: i64) -> Result<Vec<i64>>;

    async fn active_memberships(&self, competition_id: i64) -> Result<Vec<TeamGroup>>;

    /// Make `group_id` the team's active group, deactivating any previous
    /// membership. Re-activating an old membership reuses its row.
    async fn assign_team_group(&self, team_id: i64, group_id: i64) -> Result<TeamGroup>;

    async fn find_checkin(
        &self,
        competition_id: i64,
        team_id: i64,
        checkpoint_id: i64,
    ) -> Result<Option<Checkin>>;

    /// Create the (team, checkpoint) checkin at `at` unless one exists.
    /// Returns the row and whether this call created it; an existing
    /// timestamp is never touched.
    async fn ensure_checkin(
        &self,
        competition_id: i64,
        team_id: i64,
        checkpoint_id: i64,
        at: NaiveDateTime,
    ) -> Result<(Checkin, bool)>;

    /// First check-in per (team, checkpoint) for the given teams, prefetched
    /// for one evaluation run.
    async fn checkin_snapshot(
        &self,
        competition_id: i64,
        team_ids: &[i64],
    ) -> Result<CheckinSnapshot>;

    async fn score_rule(
        &self,
        competition_id: i64,
        checkpoint_id: i64,
        group_id: i64,
    ) -> Result<Option<ScoreRule>>;

    async fn upsert_score_rule(
        &self,
        competition_id: i64,
        checkpoint_id: i64,
        group_id: i64,
        rules: &serde_json::Value,
    ) -> Result<ScoreRule>;

    async fn delete_score_rule(&self, competition_id: i64, rule_id: i64) -> Result<()>;

    async fn list_score_rules(&self, competition_id: i64) -> Result<Vec<ScoreRule>>;

    async fn global_rule(
        &self,
        competition_id: i64,
        group_id: i64,
    ) -> Result<Option<GlobalScoreRule>>;

    async fn upsert_global_rule(
        &self,
        competition_id: i64,
        group_id: i64,
        rules: &serde_json::Value,
    ) -> Result<GlobalScoreRule>;

    async fn delete_global_rule(&self, competition_id: i64, rule_id: i64) -> Result<()>;

    async fn list_global_rules(&self, competition_id: i64) -> Result<Vec<GlobalScoreRule>>;

    /// The current entry for (team, checkpoint), resolved through the
    /// latest-entry index.
    async fn latest_entry(
        &self,
        competition_id: i64,
        team_id: i64,
        checkpoint_id: i64,
    ) -> Result<Option<ScoreEntry>>;

    /// Append an entry and move the latest-entry index forward, as one
    /// transaction. The index only advances: a concurrent writer with a
    /// later (created_at, id) keeps the spot.
    async fn append_entry(&self, entry: NewScoreEntry) -> Result<ScoreEntry>;

    /// Every current entry of the given teams, across all checkpoints.
    async fn latest_entries_for_teams(
        &self,
        competition_id: i64,
        team_ids: &[i64],
    ) -> Result<Vec<ScoreEntry>>;

    /// Atomic relative-race pass over the cohort: the checkpoint's current
    /// entries of the group's active members. Overwrites `total` with the
    /// normalized race score for every team that completed the window and
    /// returns exactly those entries; everyone else keeps their total.
    async fn renormalize_time_race(
        &self,
        competition_id: i64,
        checkpoint_id: i64,
        group_id: i64,
        rule: &TimeRaceRule,
    ) -> Result<Vec<ScoreEntry>>;

    /// Atomic field-path pass over the same cohort: recompute every current
    /// entry's total under `rule` (no points header applies here) and
    /// overwrite it. Returns the full cohort.
    async fn recompute_field_totals(
        &self,
        competition_id: i64,
        checkpoint_id: i64,
        group_id: i64,
        rule: Option<&ScoreRuleSpec>,
    ) -> Result<Vec<ScoreEntry>>;
}
