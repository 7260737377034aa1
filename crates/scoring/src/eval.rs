use serde_json::Value;

use crate::rules::{FieldRule, FieldRuleSpec};
use crate::snapshot::CheckinSnapshot;
use crate::value::{mapping_key, to_number};

/// Competition-scoped facts a field rule may consult. Everything is read
/// from the snapshot taken before evaluation starts; applying a rule has no
/// side effects.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub competition_id: i64,
    pub team_id: i64,
    pub checkins: &'a CheckinSnapshot,
}

/// Evaluate one submitted field value against its rule.
///
/// Every failure mode resolves to `None` rather than an error: an
/// unparsable value, a mapping miss, a rule missing one of its parameters.
/// A field that cannot be scored simply contributes nothing to the total,
/// so a single bad cell never blocks the rest of the submission.
pub fn apply_field_rule(value: &Value, rule: &FieldRuleSpec, ctx: &EvalContext<'_>) -> Option<f64> {
    match rule {
        FieldRuleSpec::Sequence(items) => {
            let mut current = value.clone();
            for item in items {
                current = match apply_field_rule(&current, item, ctx) {
                    Some(n) => number_value(n),
                    None => Value::Null,
                };
            }
            to_number(&current)
        }
        FieldRuleSpec::Rule(rule) => apply_rule(value, rule, ctx),
        // Anything that is not a recognized rule passes the value through.
        FieldRuleSpec::Other(_) => to_number(value),
    }
}

fn apply_rule(value: &Value, rule: &FieldRule, ctx: &EvalContext<'_>) -> Option<f64> {
    match rule {
        FieldRule::Mapping { map } => {
            let key = mapping_key(value)?;
            map.get(&key).and_then(to_number)
        }
        FieldRule::Interpolate { points } => interpolate(to_number(value)?, points),
        FieldRule::Multiplier { factor } => Some(to_number(value)? * (*factor)?),
        FieldRule::Deviation {
            target,
            max_points,
            penalty_points,
            penalty_distance,
            min_points,
        } => {
            let base = to_number(value)?;
            let distance = (base - (*target)?).abs();
            let penalty_distance = match penalty_distance {
                Some(d) if *d != 0.0 => *d,
                _ => return None,
            };
            let penalty = (distance / penalty_distance) * (*penalty_points)?;
            let mut points = (*max_points)? - penalty;
            if let Some(floor) = min_points {
                points = points.max(*floor);
            }
            Some(points)
        }
        // The value is irrelevant here: the rule scores how many of the
        // listed checkpoints the team has checked in at.
        FieldRule::Found {
            checkpoint_ids,
            points_per,
        } => {
            if checkpoint_ids.is_empty() {
                return None;
            }
            let count = ctx.checkins.visited_count(ctx.team_id, checkpoint_ids);
            Some((*points_per)? * count as f64)
        }
    }
}

/// Piecewise-linear interpolation over sorted control points, clamped to the
/// outermost points. An input landing exactly on a control point returns
/// that point's value.
fn interpolate(x: f64, points: &[(f64, f64)]) -> Option<f64> {
    if points.is_empty() {
        return None;
    }
    let mut sorted = points.to_vec();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

    let (first_x, first_y) = sorted[0];
    let (last_x, last_y) = sorted[sorted.len() - 1];
    if x <= first_x {
        return Some(first_y);
    }
    if x >= last_x {
        return Some(last_y);
    }
    for window in sorted.windows(2) {
        let (x1, y1) = window[0];
        let (x2, y2) = window[1];
        if x1 <= x && x <= x2 {
            if x2 == x1 {
                return Some(y1);
            }
            let t = (x - x1) / (x2 - x1);
            return Some(y1 + t * (y2 - y1));
        }
    }
    None
}

fn number_value(n: f64) -> Value {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
