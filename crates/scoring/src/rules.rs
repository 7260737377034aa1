use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, RuleError};

/// Scoring rule for one checkpoint and one group.
///
/// Stored as a JSON document on the rule row. `field_rules` maps submitted
/// field names to the rule applied to them; `total_fields` restricts which
/// computed fields are summed (all of them when absent). A present
/// `time_race` block switches the cohort to relative race scoring and the
/// field rules only serve as the pre-race baseline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreRuleSpec {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub field_rules: BTreeMap<String, FieldRuleSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_fields: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_race: Option<TimeRaceRule>,
}

/// A field rule document: a single rule, a sequence applied left to right,
/// or anything else, which passes the submitted value through unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldRuleSpec {
    Sequence(Vec<FieldRuleSpec>),
    Rule(FieldRule),
    Other(Value),
}

/// The closed set of field rule types, tagged by `"type"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldRule {
    /// Look the value up by its canonical string form. A miss scores null.
    Mapping {
        #[serde(default)]
        map: BTreeMap<String, Value>,
    },
    /// Piecewise-linear interpolation over (input, points) pairs, clamped to
    /// the outermost pairs.
    Interpolate {
        #[serde(default)]
        points: Vec<(f64, f64)>,
    },
    /// Multiply the numeric value by a constant factor.
    Multiplier {
        #[serde(default)]
        factor: Option<f64>,
    },
    /// Score distance from a target: `max_points` minus `penalty_points` per
    /// `penalty_distance` of deviation, floored at `min_points` when given.
    Deviation {
        #[serde(default)]
        target: Option<f64>,
        #[serde(default)]
        max_points: Option<f64>,
        #[serde(default)]
        penalty_points: Option<f64>,
        #[serde(default)]
        penalty_distance: Option<f64>,
        #[serde(default)]
        min_points: Option<f64>,
    },
    /// Ignore the submitted value; award `points_per` for every distinct
    /// listed checkpoint the team has checked in at.
    Found {
        #[serde(default)]
        checkpoint_ids: Vec<i64>,
        #[serde(default)]
        points_per: Option<f64>,
    },
}

/// Relative race scoring between two checkpoints: the cohort's durations are
/// normalized onto `[min_points, max_points]`, fastest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeRaceRule {
    #[serde(default)]
    pub start_checkpoint_id: Option<i64>,
    #[serde(default)]
    pub end_checkpoint_id: Option<i64>,
    #[serde(default)]
    pub min_points: f64,
    #[serde(default)]
    pub max_points: f64,
}

impl TimeRaceRule {
    /// Both endpoint checkpoints, when configured with real ids.
    pub fn endpoints(&self) -> Option<(i64, i64)> {
        match (self.start_checkpoint_id, self.end_checkpoint_id) {
            (Some(start), Some(end)) if start > 0 && end > 0 => Some((start, end)),
            _ => None,
        }
    }
}

/// Per-group rule evaluated against a team's check-ins rather than any one
/// score entry. Contributes on top of the entry totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalRuleSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub found: Option<GlobalFoundRule>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<ThresholdTimeRule>,
}

/// Award `points_per` for every distinct group checkpoint visited. The time
/// block's endpoints can be excluded so the start/finish line does not count
/// as a discovery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalFoundRule {
    #[serde(default)]
    pub points_per: Option<f64>,
    #[serde(default)]
    pub exclude_start_checkpoint: bool,
    #[serde(default)]
    pub exclude_end_checkpoint: bool,
}

/// Fixed-threshold route timing: full points at or under the threshold, then
/// `penalty_points` per `penalty_minutes` over it, floored at `min_points`.
/// Depends only on the team's own clock, never on the cohort.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdTimeRule {
    #[serde(default)]
    pub start_checkpoint_id: Option<i64>,
    #[serde(default)]
    pub end_checkpoint_id: Option<i64>,
    #[serde(default)]
    pub max_points: Option<f64>,
    #[serde(default)]
    pub threshold_minutes: Option<f64>,
    #[serde(default)]
    pub penalty_minutes: Option<f64>,
    #[serde(default)]
    pub penalty_points: Option<f64>,
    #[serde(default)]
    pub min_points: Option<f64>,
}

impl ThresholdTimeRule {
    pub fn endpoints(&self) -> Option<(i64, i64)> {
        match (self.start_checkpoint_id, self.end_checkpoint_id) {
            (Some(start), Some(end)) if start > 0 && end > 0 => Some((start, end)),
            _ => None,
        }
    }
}

impl ScoreRuleSpec {
    /// Parse and validate a rule document in one step.
    pub fn parse(value: Value) -> Result<Self> {
        let spec: Self = serde_json::from_value(value)?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(time_race) = &self.time_race {
            if time_race.endpoints().is_none() {
                return Err(RuleError::Invalid(
                    "time_race requires start_checkpoint_id and end_checkpoint_id".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl GlobalRuleSpec {
    /// Parse and validate a global rule document in one step.
    pub fn parse(value: Value) -> Result<Self> {
        let spec: Self = serde_json::from_value(value)?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<()> {
        if self.found.is_none() && self.time.is_none() {
            return Err(RuleError::Invalid(
                "global rule requires at least one of found or time".to_string(),
            ));
        }
        if let Some(time) = &self.time {
            if time.endpoints().is_none() {
                return Err(RuleError::Invalid(
                    "global time rule requires start_checkpoint_id and end_checkpoint_id"
                        .to_string(),
                ));
            }
            if time.max_points.is_none()
                || time.threshold_minutes.is_none()
                || time.penalty_points.is_none()
            {
                return Err(RuleError::Invalid(
                    "global time rule requires max_points, threshold_minutes and penalty_points"
                        .to_string(),
                ));
            }
            match time.penalty_minutes {
                Some(minutes) if minutes > 0.0 => {}
                _ => {
                    return Err(RuleError::Invalid(
                        "global time rule requires a positive penalty_minutes".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}
