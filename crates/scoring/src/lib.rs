pub mod error;
pub mod eval;
pub mod global;
pub mod rules;
pub mod snapshot;
pub mod time_race;
pub mod total;
pub mod value;

pub use error::{Result, RuleError};
pub use eval::{apply_field_rule, EvalContext};
pub use global::{global_contribution, GlobalContribution};
pub use rules::{
    FieldRule, FieldRuleSpec, GlobalFoundRule, GlobalRuleSpec, ScoreRuleSpec, ThresholdTimeRule,
    TimeRaceRule,
};
pub use snapshot::CheckinSnapshot;
pub use time_race::{race_durations, relative_race_scores};
pub use total::{compute_total, RawFields, DEAD_TIME_FIELD, POINTS_FIELD, TIME_FIELD};
