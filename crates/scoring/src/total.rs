use std::collections::BTreeMap;

use serde_json::Value;

use crate::eval::{EvalContext, apply_field_rule};
use crate::rules::ScoreRuleSpec;
use crate::value::to_number;

/// Raw field values exactly as a judge submitted them.
pub type RawFields = BTreeMap<String, Value>;

/// Dead time is tracked per entry but never summed into a total unless a
/// rule lists it explicitly.
pub const DEAD_TIME_FIELD: &str = "dead_time";
pub const TIME_FIELD: &str = "time";
pub const POINTS_FIELD: &str = "points";

/// Turn one submission's raw fields into a checkpoint total.
///
/// Three layers, applied in order:
///
/// 1. When the rule defines `field_rules`, every field is evaluated (fields
///    without a rule coerce to plain numbers) and the fields named by
///    `total_fields` are summed. The default is every evaluated field except
///    `dead_time`; listing `dead_time` in `total_fields` is the only way to
///    sum it.
/// 2. An explicitly submitted score overrides the rule result: first the
///    configured points header, then a field literally named `points`.
///    Judges entering a pre-computed score must never have it recomputed
///    away.
/// 3. With nothing else to go on, sum every numeric field except `time` and
///    `dead_time`.
///
/// `None` means the submission carried nothing scorable, which is distinct
/// from a computed zero.
pub fn compute_total(
    raw: &RawFields,
    points_header: Option<&str>,
    rule: Option<&ScoreRuleSpec>,
    ctx: &EvalContext<'_>,
) -> Option<f64> {
    let mut total = None;

    if let Some(rule) = rule {
        if !rule.field_rules.is_empty() {
            let mut computed: BTreeMap<&str, Option<f64>> = BTreeMap::new();
            for (key, value) in raw {
                let evaluated = match rule.field_rules.get(key) {
                    Some(field_rule) => apply_field_rule(value, field_rule, ctx),
                    None => to_number(value),
                };
                computed.insert(key.as_str(), evaluated);
            }
            let summed_keys: Vec<&str> = match &rule.total_fields {
                Some(keys) => keys.iter().map(String::as_str).collect(),
                None => computed
                    .keys()
                    .copied()
                    .filter(|key| *key != DEAD_TIME_FIELD)
                    .collect(),
            };
            total = sum_present(
                summed_keys
                    .into_iter()
                    .map(|key| computed.get(key).copied().flatten()),
            );
        }
    }

    if let Some(header) = points_header {
        if let Some(value) = raw.get(header) {
            total = to_number(value);
        }
    }
    if let Some(value) = raw.get(POINTS_FIELD) {
        total = to_number(value);
    }

    if total.is_none() {
        total = sum_present(
            raw.iter()
                .filter(|(key, _)| key.as_str() != TIME_FIELD && key.as_str() != DEAD_TIME_FIELD)
                .map(|(_, value)| to_number(value)),
        );
    }

    total
}

/// Sum the present values; `None` when nothing contributed.
fn sum_present(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    let mut total = 0.0;
    let mut used = false;
    for value in values.flatten() {
        total += value;
        used = true;
    }
    used.then_some(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::CheckinSnapshot;
    use serde_json::json;

    fn ctx(snapshot: &CheckinSnapshot) -> EvalContext<'_> {
        EvalContext {
            competition_id: 1,
            team_id: 7,
            checkins: snapshot,
        }
    }

    fn fields(doc: serde_json::Value) -> RawFields {
        serde_json::from_value(doc).unwrap()
    }

    fn spec(doc: serde_json::Value) -> ScoreRuleSpec {
        serde_json::from_value(doc).unwrap()
    }

    #[test]
    fn test_field_rules_sum_evaluated_fields() {
        let snapshot = CheckinSnapshot::new();
        let rule = spec(json!({
            "field_rules": {
                "accuracy": {"type": "interpolate", "points": [[0.0, 0.0], [10.0, 100.0]]},
                "targets": {"type": "multiplier", "factor": 5}
            }
        }));
        let raw = fields(json!({"accuracy": 5, "targets": 3}));
        let total = compute_total(&raw, None, Some(&rule), &ctx(&snapshot));
        assert_eq!(total, Some(65.0));
    }

    #[test]
    fn test_unruled_fields_coerce_to_numbers() {
        let snapshot = CheckinSnapshot::new();
        let rule = spec(json!({
            "field_rules": {"targets": {"type": "multiplier", "factor": 5}}
        }));
        let raw = fields(json!({"targets": 2, "bonus": "7"}));
        assert_eq!(
            compute_total(&raw, None, Some(&rule), &ctx(&snapshot)),
            Some(17.0)
        );
    }

    #[test]
    fn test_total_fields_restricts_the_sum() {
        let snapshot = CheckinSnapshot::new();
        let rule = spec(json!({
            "field_rules": {"targets": {"type": "multiplier", "factor": 5}},
            "total_fields": ["targets"]
        }));
        let raw = fields(json!({"targets": 2, "bonus": "7"}));
        assert_eq!(
            compute_total(&raw, None, Some(&rule), &ctx(&snapshot)),
            Some(10.0)
        );
    }

    #[test]
    fn test_dead_time_is_never_summed_implicitly() {
        let snapshot = CheckinSnapshot::new();
        let rule = spec(json!({
            "field_rules": {"targets": {"type": "multiplier", "factor": 5}}
        }));
        let raw = fields(json!({"targets": 2, "dead_time": 30}));
        assert_eq!(
            compute_total(&raw, None, Some(&rule), &ctx(&snapshot)),
            Some(10.0)
        );
        // Listing it explicitly is the only way in.
        let rule = spec(json!({
            "field_rules": {"targets": {"type": "multiplier", "factor": 5}},
            "total_fields": ["targets", "dead_time"]
        }));
        assert_eq!(
            compute_total(&raw, None, Some(&rule), &ctx(&snapshot)),
            Some(40.0)
        );
    }

    #[test]
    fn test_explicit_points_beats_rule_total() {
        let snapshot = CheckinSnapshot::new();
        let rule = spec(json!({
            "field_rules": {"targets": {"type": "multiplier", "factor": 20}}
        }));
        let raw = fields(json!({"targets": 2, "points": 99}));
        assert_eq!(
            compute_total(&raw, None, Some(&rule), &ctx(&snapshot)),
            Some(99.0)
        );
    }

    #[test]
    fn test_points_header_overrides_and_literal_points_wins_last() {
        let snapshot = CheckinSnapshot::new();
        let raw = fields(json!({"Score": 40, "targets": 2}));
        assert_eq!(
            compute_total(&raw, Some("Score"), None, &ctx(&snapshot)),
            Some(40.0)
        );
        let raw = fields(json!({"Score": 40, "points": 55}));
        assert_eq!(
            compute_total(&raw, Some("Score"), None, &ctx(&snapshot)),
            Some(55.0)
        );
    }

    #[test]
    fn test_unparsable_points_falls_back_to_sum() {
        let snapshot = CheckinSnapshot::new();
        let raw = fields(json!({"points": "n/a", "targets": 2, "bonus": 3}));
        assert_eq!(compute_total(&raw, None, None, &ctx(&snapshot)), Some(5.0));
    }

    #[test]
    fn test_fallback_sum_skips_time_fields() {
        let snapshot = CheckinSnapshot::new();
        let raw = fields(json!({"targets": 2, "bonus": "3", "time": 600, "dead_time": 42}));
        assert_eq!(compute_total(&raw, None, None, &ctx(&snapshot)), Some(5.0));
    }

    #[test]
    fn test_nothing_scorable_is_null() {
        let snapshot = CheckinSnapshot::new();
        let raw = fields(json!({"notes": "windy", "time": 600}));
        assert_eq!(compute_total(&raw, None, None, &ctx(&snapshot)), None);
        let raw = RawFields::new();
        assert_eq!(compute_total(&raw, None, None, &ctx(&snapshot)), None);
    }

    #[test]
    fn test_rule_with_no_scorable_fields_is_null_not_zero() {
        let snapshot = CheckinSnapshot::new();
        let rule = spec(json!({
            "field_rules": {"accuracy": {"type": "mapping", "map": {"hit": 10}}}
        }));
        let raw = fields(json!({"accuracy": "miss"}));
        assert_eq!(compute_total(&raw, None, Some(&rule), &ctx(&snapshot)), None);
    }
}
