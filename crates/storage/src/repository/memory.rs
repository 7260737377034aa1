use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::NaiveDateTime;
use scoring::{
    CheckinSnapshot, EvalContext, ScoreRuleSpec, TimeRaceRule, compute_total, race_durations,
    relative_race_scores,
};

use crate::error::{Result, StorageError};
use crate::models::{
    Checkin, Checkpoint, CheckpointGroup, CheckpointGroupLink, Competition, GlobalScoreRule,
    NewScoreEntry, ScoreEntry, ScoreRule, Team, TeamCard, TeamGroup, normalize_card_uid,
};
use crate::repository::CompetitionStore;

/// In-memory [`CompetitionStore`] for embedding and tests. Cheap to clone;
/// clones share the same state. The recompute passes run under the single
/// write lock, which is what makes them atomic here.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    last_id: i64,
    competitions: BTreeMap<i64, Competition>,
    teams: BTreeMap<i64, Team>,
    cards: Vec<TeamCard>,
    checkpoints: BTreeMap<i64, Checkpoint>,
    groups: BTreeMap<i64, CheckpointGroup>,
    group_links: Vec<CheckpointGroupLink>,
    team_groups: Vec<TeamGroup>,
    checkins: Vec<Checkin>,
    score_rules: Vec<ScoreRule>,
    global_rules: Vec<GlobalScoreRule>,
    entries: BTreeMap<i64, ScoreEntry>,
    // (competition, team, checkpoint) -> (entry id, created_at)
    latest: BTreeMap<(i64, i64, i64), (i64, NaiveDateTime)>,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn cohort_team_ids(&self, competition_id: i64, group_id: i64) -> Vec<i64> {
        self.team_groups
            .iter()
            .filter(|tg| tg.active && tg.group_id == group_id)
            .filter(|tg| {
                self.teams
                    .get(&tg.team_id)
                    .is_some_and(|t| t.competition_id == competition_id)
            })
            .map(|tg| tg.team_id)
            .collect()
    }

    fn cohort_entry_ids(&self, competition_id: i64, checkpoint_id: i64, group_id: i64) -> Vec<i64> {
        self.cohort_team_ids(competition_id, group_id)
            .into_iter()
            .filter_map(|team_id| self.latest.get(&(competition_id, team_id, checkpoint_id)))
            .map(|(entry_id, _)| *entry_id)
            .collect()
    }

    fn snapshot_for(&self, competition_id: i64, team_ids: &[i64]) -> CheckinSnapshot {
        let mut snapshot = CheckinSnapshot::new();
        for checkin in &self.checkins {
            if checkin.competition_id == competition_id && team_ids.contains(&checkin.team_id) {
                snapshot.record(checkin.team_id, checkin.checkpoint_id, checkin.timestamp);
            }
        }
        snapshot
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // A poisoned lock still holds consistent data.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create_competition(&self, name: &str) -> Competition {
        let mut inner = self.write();
        let competition = Competition {
            id: inner.next_id(),
            name: name.to_string(),
            created_at: chrono::Utc::now().naive_utc(),
        };
        inner.competitions.insert(competition.id, competition.clone());
        competition
    }

    pub fn create_team(
        &self,
        competition_id: i64,
        name: &str,
        number: Option<i32>,
        organization: Option<&str>,
    ) -> Team {
        let mut inner = self.write();
        let team = Team {
            id: inner.next_id(),
            competition_id,
            name: name.to_string(),
            number,
            organization: organization.map(str::to_string),
            dnf: false,
        };
        inner.teams.insert(team.id, team.clone());
        team
    }

    pub fn create_checkpoint(&self, competition_id: i64, name: &str) -> Checkpoint {
        let mut inner = self.write();
        let checkpoint = Checkpoint {
            id: inner.next_id(),
            competition_id,
            name: name.to_string(),
            location: None,
        };
        inner.checkpoints.insert(checkpoint.id, checkpoint.clone());
        checkpoint
    }

    pub fn create_group(
        &self,
        competition_id: i64,
        name: &str,
        position: Option<i32>,
    ) -> CheckpointGroup {
        let mut inner = self.write();
        let group = CheckpointGroup {
            id: inner.next_id(),
            competition_id,
            name: name.to_string(),
            description: None,
            position,
        };
        inner.groups.insert(group.id, group.clone());
        group
    }

    pub fn link_checkpoint_to_group(
        &self,
        checkpoint_id: i64,
        group_id: i64,
        position: Option<i32>,
    ) {
        self.write().group_links.push(CheckpointGroupLink {
            checkpoint_id,
            group_id,
            position,
        });
    }

    pub fn add_card(&self, team_id: i64, uid: &str) -> TeamCard {
        let mut inner = self.write();
        let card = TeamCard {
            id: inner.next_id(),
            team_id,
            uid: normalize_card_uid(uid),
        };
        inner.cards.push(card.clone());
        card
    }

    /// Seed a check-in directly, bypassing the one-per-pair guard the
    /// submission path relies on. Test setup only needs the first one.
    pub fn record_checkin(
        &self,
        competition_id: i64,
        team_id: i64,
        checkpoint_id: i64,
        at: NaiveDateTime,
    ) -> Checkin {
        let mut inner = self.write();
        let checkin = Checkin {
            id: inner.next_id(),
            competition_id,
            team_id,
            checkpoint_id,
            timestamp: at,
        };
        inner.checkins.push(checkin.clone());
        checkin
    }

    pub fn set_dnf(&self, team_id: i64, dnf: bool) {
        if let Some(team) = self.write().teams.get_mut(&team_id) {
            team.dnf = dnf;
        }
    }
}

#[async_trait::async_trait]
impl CompetitionStore for MemoryStore {
    async fn checkpoint(
        &self,
        competition_id: i64,
        checkpoint_id: i64,
    ) -> Result<Option<Checkpoint>> {
        Ok(self
            .read()
            .checkpoints
            .get(&checkpoint_id)
            .filter(|c| c.competition_id == competition_id)
            .cloned())
    }

    async fn team(&self, competition_id: i64, team_id: i64) -> Result<Option<Team>> {
        Ok(self
            .read()
            .teams
            .get(&team_id)
            .filter(|t| t.competition_id == competition_id)
            .cloned())
    }

    async fn team_by_card_uid(
        &self,
        competition_id: i64,
        card_uid: &str,
    ) -> Result<Option<Team>> {
        let uid = normalize_card_uid(card_uid);
        let inner = self.read();
        Ok(inner
            .cards
            .iter()
            .find(|card| card.uid == uid)
            .and_then(|card| inner.teams.get(&card.team_id))
            .filter(|team| team.competition_id == competition_id)
            .cloned())
    }

    async fn group(&self, competition_id: i64, group_id: i64) -> Result<Option<CheckpointGroup>> {
        Ok(self
            .read()
            .groups
            .get(&group_id)
            .filter(|g| g.competition_id == competition_id)
            .cloned())
    }

    async fn active_group(&self, team_id: i64) -> Result<Option<CheckpointGroup>> {
        let inner = self.read();
        Ok(inner
            .team_groups
            .iter()
            .find(|tg| tg.team_id == team_id && tg.active)
            .and_then(|tg| inner.groups.get(&tg.group_id))
            .cloned())
    }

    async fn list_teams(&self, competition_id: i64, group_id: Option<i64>) -> Result<Vec<Team>> {
        let inner = self.read();
        let mut teams: Vec<Team> = inner
            .teams
            .values()
            .filter(|team| team.competition_id == competition_id)
            .filter(|team| match group_id {
                Some(group_id) => inner
                    .team_groups
                    .iter()
                    .any(|tg| tg.team_id == team.id && tg.group_id == group_id && tg.active),
                None => true,
            })
            .cloned()
            .collect();
        teams.sort_by(|a, b| {
            (a.number.is_none(), a.number, &a.name).cmp(&(b.number.is_none(), b.number, &b.name))
        });
        Ok(teams)
    }

    async fn list_groups(&self, competition_id: i64) -> Result<Vec<CheckpointGroup>> {
        let mut groups: Vec<CheckpointGroup> = self
            .read()
            .groups
            .values()
            .filter(|g| g.competition_id == competition_id)
            .cloned()
            .collect();
        groups.sort_by(|a, b| {
            (a.position.is_none(), a.position, &a.name)
                .cmp(&(b.position.is_none(), b.position, &b.name))
        });
        Ok(groups)
    }

    async fn group_checkpoints(&self, group_id: i64) -> Result<Vec<i64>> {
        let mut links: Vec<&CheckpointGroupLink> = Vec::new();
        let inner = self.read();
        for link in &inner.group_links {
            if link.group_id == group_id {
                links.push(link);
            }
        }
        links.sort_by_key(|link| (link.position.is_none(), link.position, link.checkpoint_id));
        Ok(links.iter().map(|link| link.checkpoint_id).collect())
    }

    async fn active_memberships(&self, competition_id: i64) -> Result<Vec<TeamGroup>> {
        let inner = self.read();
        Ok(inner
            .team_groups
            .iter()
            .filter(|tg| tg.active)
            .filter(|tg| {
                inner
                    .teams
                    .get(&tg.team_id)
                    .is_some_and(|t| t.competition_id == competition_id)
            })
            .cloned()
            .collect())
    }

    async fn assign_team_group(&self, team_id: i64, group_id: i64) -> Result<TeamGroup> {
        let mut inner = self.write();
        if !inner.teams.contains_key(&team_id) || !inner.groups.contains_key(&group_id) {
            return Err(StorageError::NotFound);
        }
        for membership in inner.team_groups.iter_mut() {
            if membership.team_id == team_id {
                membership.active = membership.group_id == group_id;
            }
        }
        if let Some(existing) = inner
            .team_groups
            .iter()
            .find(|tg| tg.team_id == team_id && tg.group_id == group_id)
        {
            return Ok(existing.clone());
        }
        let membership = TeamGroup {
            id: inner.next_id(),
            team_id,
            group_id,
            active: true,
        };
        inner.team_groups.push(membership.clone());
        Ok(membership)
    }

    async fn find_checkin(
        &self,
        competition_id: i64,
        team_id: i64,
        checkpoint_id: i64,
    ) -> Result<Option<Checkin>> {
        Ok(self
            .read()
            .checkins
            .iter()
            .find(|c| {
                c.competition_id == competition_id
                    && c.team_id == team_id
                    && c.checkpoint_id == checkpoint_id
            })
            .cloned())
    }

    async fn ensure_checkin(
        &self,
        competition_id: i64,
        team_id: i64,
        checkpoint_id: i64,
        at: NaiveDateTime,
    ) -> Result<(Checkin, bool)> {
        let mut inner = self.write();
        if let Some(existing) = inner.checkins.iter().find(|c| {
            c.competition_id == competition_id
                && c.team_id == team_id
                && c.checkpoint_id == checkpoint_id
        }) {
            return Ok((existing.clone(), false));
        }
        let checkin = Checkin {
            id: inner.next_id(),
            competition_id,
            team_id,
            checkpoint_id,
            timestamp: at,
        };
        inner.checkins.push(checkin.clone());
        Ok((checkin, true))
    }

    async fn checkin_snapshot(
        &self,
        competition_id: i64,
        team_ids: &[i64],
    ) -> Result<CheckinSnapshot> {
        Ok(self.read().snapshot_for(competition_id, team_ids))
    }

    async fn score_rule(
        &self,
        competition_id: i64,
        checkpoint_id: i64,
        group_id: i64,
    ) -> Result<Option<ScoreRule>> {
        Ok(self
            .read()
            .score_rules
            .iter()
            .find(|rule| {
                rule.competition_id == competition_id
                    && rule.checkpoint_id == checkpoint_id
                    && rule.group_id == group_id
            })
            .cloned())
    }

    async fn upsert_score_rule(
        &self,
        competition_id: i64,
        checkpoint_id: i64,
        group_id: i64,
        rules: &serde_json::Value,
    ) -> Result<ScoreRule> {
        let mut inner = self.write();
        if let Some(existing) = inner.score_rules.iter_mut().find(|rule| {
            rule.competition_id == competition_id
                && rule.checkpoint_id == checkpoint_id
                && rule.group_id == group_id
        }) {
            existing.rules = rules.clone();
            return Ok(existing.clone());
        }
        let rule = ScoreRule {
            id: inner.next_id(),
            competition_id,
            checkpoint_id,
            group_id,
            rules: rules.clone(),
            created_at: chrono::Utc::now().naive_utc(),
        };
        inner.score_rules.push(rule.clone());
        Ok(rule)
    }

    async fn delete_score_rule(&self, competition_id: i64, rule_id: i64) -> Result<()> {
        let mut inner = self.write();
        let before = inner.score_rules.len();
        inner
            .score_rules
            .retain(|rule| !(rule.id == rule_id && rule.competition_id == competition_id));
        if inner.score_rules.len() == before {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn list_score_rules(&self, competition_id: i64) -> Result<Vec<ScoreRule>> {
        Ok(self
            .read()
            .score_rules
            .iter()
            .filter(|rule| rule.competition_id == competition_id)
            .cloned()
            .collect())
    }

    async fn global_rule(
        &self,
        competition_id: i64,
        group_id: i64,
    ) -> Result<Option<GlobalScoreRule>> {
        Ok(self
            .read()
            .global_rules
            .iter()
            .find(|rule| rule.competition_id == competition_id && rule.group_id == group_id)
            .cloned())
    }

    async fn upsert_global_rule(
        &self,
        competition_id: i64,
        group_id: i64,
        rules: &serde_json::Value,
    ) -> Result<GlobalScoreRule> {
        let mut inner = self.write();
        if let Some(existing) = inner
            .global_rules
            .iter_mut()
            .find(|rule| rule.competition_id == competition_id && rule.group_id == group_id)
        {
            existing.rules = rules.clone();
            return Ok(existing.clone());
        }
        let rule = GlobalScoreRule {
            id: inner.next_id(),
            competition_id,
            group_id,
            rules: rules.clone(),
            created_at: chrono::Utc::now().naive_utc(),
        };
        inner.global_rules.push(rule.clone());
        Ok(rule)
    }

    async fn delete_global_rule(&self, competition_id: i64, rule_id: i64) -> Result<()> {
        let mut inner = self.write();
        let before = inner.global_rules.len();
        inner
            .global_rules
            .retain(|rule| !(rule.id == rule_id && rule.competition_id == competition_id));
        if inner.global_rules.len() == before {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn list_global_rules(&self, competition_id: i64) -> Result<Vec<GlobalScoreRule>> {
        Ok(self
            .read()
            .global_rules
            .iter()
            .filter(|rule| rule.competition_id == competition_id)
            .cloned()
            .collect())
    }

    async fn latest_entry(
        &self,
        competition_id: i64,
        team_id: i64,
        checkpoint_id: i64,
    ) -> Result<Option<ScoreEntry>> {
        let inner = self.read();
        Ok(inner
            .latest
            .get(&(competition_id, team_id, checkpoint_id))
            .and_then(|(entry_id, _)| inner.entries.get(entry_id))
            .cloned())
    }

    async fn append_entry(&self, entry: NewScoreEntry) -> Result<ScoreEntry> {
        let mut inner = self.write();
        let entry = ScoreEntry {
            id: inner.next_id(),
            competition_id: entry.competition_id,
            checkin_id: entry.checkin_id,
            team_id: entry.team_id,
            checkpoint_id: entry.checkpoint_id,
            judge_id: entry.judge_id,
            raw_fields: entry.raw_fields,
            total: entry.total,
            created_at: entry.created_at,
        };
        let key = (entry.competition_id, entry.team_id, entry.checkpoint_id);
        let candidate = (entry.created_at, entry.id);
        match inner.latest.get(&key) {
            Some(&(current_id, current_at)) if (current_at, current_id) >= candidate => {}
            _ => {
                inner.latest.insert(key, (entry.id, entry.created_at));
            }
        }
        inner.entries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn latest_entries_for_teams(
        &self,
        competition_id: i64,
        team_ids: &[i64],
    ) -> Result<Vec<ScoreEntry>> {
        let inner = self.read();
        Ok(inner
            .latest
            .iter()
            .filter(|((comp, team, _), _)| *comp == competition_id && team_ids.contains(team))
            .filter_map(|(_, (entry_id, _))| inner.entries.get(entry_id))
            .cloned()
            .collect())
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
        let mut inner = self.write();

        let entry_ids = inner.cohort_entry_ids(competition_id, checkpoint_id, group_id);
        if entry_ids.is_empty() {
            return Ok(Vec::new());
        }
        // The race runs between the teams that have an entry here; members
        // who were never scored do not stretch the scale.
        let team_ids: Vec<i64> = entry_ids
            .iter()
            .filter_map(|id| inner.entries.get(id))
            .map(|entry| entry.team_id)
            .collect();
        let snapshot = inner.snapshot_for(competition_id, &team_ids);
        let durations = race_durations(&team_ids, &snapshot, start_id, end_id);
        let scores = relative_race_scores(&durations, rule.min_points, rule.max_points);

        let mut updated = Vec::new();
        for entry_id in entry_ids {
            let Some(entry) = inner.entries.get_mut(&entry_id) else {
                continue;
            };
            if let Some(score) = scores.get(&entry.team_id) {
                entry.total = Some(*score);
                updated.push(entry.clone());
            }
        }
        Ok(updated)
    }

    async fn recompute_field_totals(
        &self,
        competition_id: i64,
        checkpoint_id: i64,
        group_id: i64,
        rule: Option<&ScoreRuleSpec>,
    ) -> Result<Vec<ScoreEntry>> {
        let mut inner = self.write();

        let entry_ids = inner.cohort_entry_ids(competition_id, checkpoint_id, group_id);
        if entry_ids.is_empty() {
            return Ok(Vec::new());
        }
        let team_ids: Vec<i64> = entry_ids
            .iter()
            .filter_map(|id| inner.entries.get(id))
            .map(|entry| entry.team_id)
            .collect();
        let snapshot = inner.snapshot_for(competition_id, &team_ids);

        let mut totals = Vec::with_capacity(entry_ids.len());
        for entry_id in &entry_ids {
            let Some(entry) = inner.entries.get(entry_id) else {
                continue;
            };
            let ctx = EvalContext {
                competition_id,
                team_id: entry.team_id,
                checkins: &snapshot,
            };
            totals.push((*entry_id, compute_total(&entry.raw_fields, None, rule, &ctx)));
        }

        let mut updated = Vec::with_capacity(totals.len());
        for (entry_id, total) in totals {
            if let Some(entry) = inner.entries.get_mut(&entry_id) {
                entry.total = total;
                updated.push(entry.clone());
            }
        }
        Ok(updated)
    }
}
