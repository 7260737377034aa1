pub mod recompute;
pub mod rules;
pub mod standings;
pub mod submission;
