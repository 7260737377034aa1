use std::collections::BTreeMap;

use crate::snapshot::CheckinSnapshot;

/// Elapsed race time in seconds for every team that completed the window:
/// first check-in at the start checkpoint through first check-in at the end
/// checkpoint. Teams missing either end, or whose end precedes their start,
/// are left out and keep whatever total they already have.
pub fn race_durations(
    team_ids: &[i64],
    checkins: &CheckinSnapshot,
    start_checkpoint_id: i64,
    end_checkpoint_id: i64,
) -> BTreeMap<i64, f64> {
    let mut durations = BTreeMap::new();
    for &team_id in team_ids {
        let Some(start) = checkins.first_checkin(team_id, start_checkpoint_id) else {
            continue;
        };
        let Some(end) = checkins.first_checkin(team_id, end_checkpoint_id) else {
            continue;
        };
        let seconds = (end - start).num_milliseconds() as f64 / 1000.0;
        if seconds < 0.0 {
            continue;
        }
        durations.insert(team_id, seconds);
    }
    durations
}

/// Normalize a cohort's race durations onto `[min_points, max_points]`.
///
/// The fastest team receives `max_points`, the slowest `min_points`, and
/// everyone in between scales linearly. An all-tied cohort collapses the
/// scale, so every team receives `max_points`. The result is relative: it
/// only holds for exactly this set of durations and must be recomputed when
/// the cohort changes.
///
/// Not to be confused with the fixed-threshold route timing in
/// [`crate::global`], which scores each team against the clock alone.
pub fn relative_race_scores(
    durations: &BTreeMap<i64, f64>,
    min_points: f64,
    max_points: f64,
) -> BTreeMap<i64, f64> {
    if durations.is_empty() {
        return BTreeMap::new();
    }
    let min_d = durations.values().copied().fold(f64::INFINITY, f64::min);
    let max_d = durations.values().copied().fold(f64::NEG_INFINITY, f64::max);

    if max_d == min_d {
        return durations.keys().map(|&team| (team, max_points)).collect();
    }

    durations
        .iter()
        .map(|(&team, &duration)| {
            let t = (duration - min_d) / (max_d - min_d);
            (team, max_points - t * (max_points - min_points))
        })
        .collect()
}
