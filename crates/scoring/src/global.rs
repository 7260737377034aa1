use crate::rules::{GlobalFoundRule, GlobalRuleSpec, ThresholdTimeRule};
use crate::snapshot::CheckinSnapshot;

/// A team's points from a group's global rule, split per block. `total` is
/// the sum of whichever blocks applied, or `None` when neither did, so an
/// inapplicable rule never drags a team's standing down to zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GlobalContribution {
    pub total: Option<f64>,
    pub found_points: Option<f64>,
    pub time_points: Option<f64>,
}

/// Evaluate a group's global rule for one team against its check-ins.
///
/// `group_checkpoint_ids` is the group's full membership; the found block
/// counts distinct visits among them, minus any route endpoints the rule
/// excludes.
pub fn global_contribution(
    spec: &GlobalRuleSpec,
    team_id: i64,
    group_checkpoint_ids: &[i64],
    checkins: &CheckinSnapshot,
) -> GlobalContribution {
    let found_points = spec.found.as_ref().and_then(|rule| {
        found_points(rule, spec.time.as_ref(), team_id, group_checkpoint_ids, checkins)
    });
    let time_points = spec
        .time
        .as_ref()
        .and_then(|rule| threshold_time_points(rule, team_id, checkins));

    let total = match (found_points, time_points) {
        (None, None) => None,
        (found, time) => Some(found.unwrap_or(0.0) + time.unwrap_or(0.0)),
    };
    GlobalContribution { total, found_points, time_points }
}

/// `points_per` for every distinct group checkpoint the team has visited.
/// Zero visits still score: a configured found block always contributes,
/// even when the contribution is 0. Skipped only when `points_per` is unset
/// or the exclusions leave nothing to count.
pub fn found_points(
    rule: &GlobalFoundRule,
    time: Option<&ThresholdTimeRule>,
    team_id: i64,
    group_checkpoint_ids: &[i64],
    checkins: &CheckinSnapshot,
) -> Option<f64> {
    let points_per = rule.points_per?;

    let mut excluded: Vec<i64> = Vec::new();
    if let Some(time) = time {
        if rule.exclude_start_checkpoint {
            if let Some(id) = time.start_checkpoint_id.filter(|id| *id != 0) {
                excluded.push(id);
            }
        }
        if rule.exclude_end_checkpoint {
            if let Some(id) = time.end_checkpoint_id.filter(|id| *id != 0) {
                excluded.push(id);
            }
        }
    }

    let counted: Vec<i64> = group_checkpoint_ids
        .iter()
        .copied()
        .filter(|id| !excluded.contains(id))
        .collect();
    if counted.is_empty() {
        return None;
    }
    Some(points_per * checkins.visited_count(team_id, &counted) as f64)
}

/// Fixed-threshold route timing: `max_points` at or under `threshold_minutes`,
/// then a linear `penalty_points` per `penalty_minutes` over it, floored at
/// `min_points`. Each team races its own clock, so one team's time never
/// moves another's score.
pub fn threshold_time_points(
    rule: &ThresholdTimeRule,
    team_id: i64,
    checkins: &CheckinSnapshot,
) -> Option<f64> {
    let (start_id, end_id) = rule.endpoints()?;
    let max_points = rule.max_points?;
    let threshold_minutes = rule.threshold_minutes?;
    let penalty_minutes = rule.penalty_minutes?;
    let penalty_points = rule.penalty_points?;
    if penalty_minutes == 0.0 {
        return None;
    }
    let min_points = rule.min_points.unwrap_or(0.0);

    let start = checkins.first_checkin(team_id, start_id)?;
    let end = checkins.first_checkin(team_id, end_id)?;
    let minutes = (end - start).num_milliseconds() as f64 / 60_000.0;

    let points = if minutes <= threshold_minutes {
        max_points
    } else {
        let over = (minutes - threshold_minutes).max(0.0);
        max_points - (over / penalty_minutes) * penalty_points
    };
    Some(points.max(min_points))
}
