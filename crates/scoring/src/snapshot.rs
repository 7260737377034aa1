use std::collections::BTreeMap;

use chrono::NaiveDateTime;

/// First check-in time per (team, checkpoint), prefetched for one
/// computation.
///
/// The evaluator and the global calculator never touch the database: the
/// store loads the relevant check-ins once and hands them over through this
/// snapshot, so the same rules produce the same numbers for any caller that
/// supplies the same check-in facts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckinSnapshot {
    first_seen: BTreeMap<(i64, i64), NaiveDateTime>,
}

impl CheckinSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a check-in; earlier timestamps win over later ones.
    pub fn record(&mut self, team_id: i64, checkpoint_id: i64, at: NaiveDateTime) {
        self.first_seen
            .entry((team_id, checkpoint_id))
            .and_modify(|existing| {
                if at < *existing {
                    *existing = at;
                }
            })
            .or_insert(at);
    }

    /// Earliest check-in of a team at a checkpoint, when it has one.
    pub fn first_checkin(&self, team_id: i64, checkpoint_id: i64) -> Option<NaiveDateTime> {
        self.first_seen.get(&(team_id, checkpoint_id)).copied()
    }

    pub fn has_visited(&self, team_id: i64, checkpoint_id: i64) -> bool {
        self.first_seen.contains_key(&(team_id, checkpoint_id))
    }

    /// Number of distinct checkpoints from `checkpoint_ids` the team has
    /// checked in at. Duplicate ids in the list count once.
    pub fn visited_count(&self, team_id: i64, checkpoint_ids: &[i64]) -> usize {
        let mut seen = std::collections::BTreeSet::new();
        checkpoint_ids
            .iter()
            .filter(|id| self.has_visited(team_id, **id) && seen.insert(**id))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.first_seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(minute: u32) -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2025, 6, 14)
            .unwrap()
            .and_hms_opt(9, minute, 0)
            .unwrap()
    }

    #[test]
    fn test_record_keeps_earliest_timestamp() {
        let mut snapshot = CheckinSnapshot::new();
        snapshot.record(1, 10, ts(30));
        snapshot.record(1, 10, ts(5));
        snapshot.record(1, 10, ts(45));
        assert_eq!(snapshot.first_checkin(1, 10), Some(ts(5)));
    }

    #[test]
    fn test_visited_count_is_distinct() {
        let mut snapshot = CheckinSnapshot::new();
        snapshot.record(1, 10, ts(0));
        snapshot.record(1, 11, ts(1));
        assert_eq!(snapshot.visited_count(1, &[10, 11, 12]), 2);
        assert_eq!(snapshot.visited_count(1, &[10, 10, 10]), 1);
        assert_eq!(snapshot.visited_count(2, &[10, 11]), 0);
    }
}
