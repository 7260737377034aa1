pub mod rules;
pub mod standings;
pub mod submission;
