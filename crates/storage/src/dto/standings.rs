use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One team's standings row. `total` already includes the global
/// contribution; the split is reported alongside for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamStanding {
    pub team_id: i64,
    pub name: String,
    pub number: Option<i32>,
    pub group_name: String,
    pub organization: String,
    pub total: f64,
    pub dead_time: f64,
    pub global_time: f64,
    pub global_found: f64,
    pub time_minutes: Option<f64>,
    pub dnf: bool,
    pub finished: bool,
    pub place: u32,
    /// Current-entry total per member checkpoint; a null total is still a
    /// visited checkpoint.
    pub checkpoint_totals: BTreeMap<i64, Option<f64>>,
}

/// A group's summed team totals and its rank among the groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupTotal {
    pub name: String,
    pub total: f64,
    pub rank: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationTotal {
    pub name: String,
    pub total: f64,
}

/// The full standings table for a competition, optionally narrowed to the
/// teams of one group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Standings {
    pub rows: Vec<TeamStanding>,
    pub group_totals: Vec<GroupTotal>,
    pub organization_totals: Vec<OrganizationTotal>,
}
