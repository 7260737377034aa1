mod checkin;
mod checkpoint;
mod checkpoint_group;
mod competition;
mod score_entry;
mod score_rule;
mod team;
mod team_card;
mod team_group;

pub use checkin::Checkin;
pub use checkpoint::Checkpoint;
pub use checkpoint_group::{CheckpointGroup, CheckpointGroupLink};
pub use competition::Competition;
pub use score_entry::{NewScoreEntry, ScoreEntry};
pub use score_rule::{GlobalScoreRule, ScoreRule};
pub use team::Team;
pub use team_card::{normalize_card_uid, TeamCard};
pub use team_group::TeamGroup;
