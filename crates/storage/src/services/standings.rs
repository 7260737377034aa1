use std::collections::{BTreeMap, BTreeSet, HashMap};

use scoring::value::to_number;
use scoring::{global_contribution, GlobalContribution, DEAD_TIME_FIELD};

use crate::dto::standings::{GroupTotal, OrganizationTotal, Standings, TeamStanding};
use crate::error::Result;
use crate::repository::CompetitionStore;

/// Build the standings table for a competition, optionally narrowed to the
/// active members of one group.
///
/// Per team: current-entry totals summed over the active group's member
/// checkpoints (teams without a group sum everything), accumulated dead
/// time, the live global contribution, elapsed route time between the first
/// and last member checkpoints, and a finished flag for the final one. Rows
/// sort by (group order, group name, DNF last, total desc, team name) with
/// consecutive places per group.
pub async fn standings<S>(
    store: &S,
    competition_id: i64,
    group_id: Option<i64>,
) -> Result<Standings>
where
    S: CompetitionStore + ?Sized,
{
    let groups = store.list_groups(competition_id).await?;
    let group_order: Vec<String> = groups
        .iter()
        .filter(|g| !g.name.is_empty())
        .map(|g| g.name.trim().to_lowercase())
        .collect();
    let group_names: HashMap<i64, &str> = groups.iter().map(|g| (g.id, g.name.as_str())).collect();

    let teams = store.list_teams(competition_id, group_id).await?;
    let team_ids: Vec<i64> = teams.iter().map(|t| t.id).collect();

    let entries = store
        .latest_entries_for_teams(competition_id, &team_ids)
        .await?;
    let snapshot = store.checkin_snapshot(competition_id, &team_ids).await?;

    let mut team_group_ids: HashMap<i64, i64> = HashMap::new();
    for membership in store.active_memberships(competition_id).await? {
        team_group_ids
            .entry(membership.team_id)
            .or_insert(membership.group_id);
    }

    let mut group_route: HashMap<i64, Vec<i64>> = HashMap::new();
    let member_group_ids: BTreeSet<i64> = team_group_ids.values().copied().collect();
    for gid in member_group_ids {
        group_route.insert(gid, store.group_checkpoints(gid).await?);
    }

    let mut totals: HashMap<i64, f64> = HashMap::new();
    let mut dead_times: HashMap<i64, f64> = HashMap::new();
    let mut checkpoint_totals: HashMap<i64, BTreeMap<i64, Option<f64>>> = HashMap::new();
    for entry in &entries {
        if let Some(route) = team_group_ids
            .get(&entry.team_id)
            .and_then(|gid| group_route.get(gid))
        {
            if !route.contains(&entry.checkpoint_id) {
                continue;
            }
        }
        if let Some(total) = entry.total {
            *totals.entry(entry.team_id).or_insert(0.0) += total;
        }
        checkpoint_totals
            .entry(entry.team_id)
            .or_default()
            .insert(entry.checkpoint_id, entry.total);
        // Older sheets recorded dead time under its display header.
        let dead = entry
            .raw_fields
            .get(DEAD_TIME_FIELD)
            .or_else(|| entry.raw_fields.get("Dead Time"));
        if let Some(minutes) = dead.and_then(to_number) {
            *dead_times.entry(entry.team_id).or_insert(0.0) += minutes;
        }
    }

    let global_rules = store.list_global_rules(competition_id).await?;
    let rules_by_group: HashMap<i64, &crate::models::GlobalScoreRule> =
        global_rules.iter().map(|rule| (rule.group_id, rule)).collect();

    let mut rows = Vec::with_capacity(teams.len());
    for team in &teams {
        let team_group = team_group_ids.get(&team.id);
        let route = team_group
            .and_then(|gid| group_route.get(gid))
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let contribution = match team_group.and_then(|gid| rules_by_group.get(gid)) {
            Some(rule) => global_contribution(&rule.spec()?, team.id, route, &snapshot),
            None => GlobalContribution::default(),
        };

        let time_minutes = match (route.first(), route.last()) {
            (Some(&start_id), Some(&end_id)) => snapshot
                .first_checkin(team.id, start_id)
                .zip(snapshot.first_checkin(team.id, end_id))
                .filter(|(start, end)| end >= start)
                .map(|(start, end)| (end - start).num_milliseconds() as f64 / 60_000.0),
            _ => None,
        };
        let finished = route
            .last()
            .is_some_and(|&final_id| snapshot.has_visited(team.id, final_id));

        rows.push(TeamStanding {
            team_id: team.id,
            name: team.name.clone(),
            number: team.number,
            group_name: team_group
                .and_then(|gid| group_names.get(gid))
                .copied()
                .unwrap_or("")
                .to_string(),
            organization: team.organization.clone().unwrap_or_default(),
            total: totals.get(&team.id).copied().unwrap_or(0.0)
                + contribution.total.unwrap_or(0.0),
            dead_time: dead_times.get(&team.id).copied().unwrap_or(0.0),
            global_time: contribution.time_points.unwrap_or(0.0),
            global_found: contribution.found_points.unwrap_or(0.0),
            time_minutes,
            dnf: team.dnf,
            finished,
            place: 0,
            checkpoint_totals: checkpoint_totals.remove(&team.id).unwrap_or_default(),
        });
    }

    let group_index = |name: &str| -> usize {
        let norm = name.trim().to_lowercase();
        group_order
            .iter()
            .position(|ordered| *ordered == norm)
            .unwrap_or(group_order.len())
    };
    rows.sort_by(|a, b| {
        group_index(&a.group_name)
            .cmp(&group_index(&b.group_name))
            .then_with(|| a.group_name.trim().cmp(b.group_name.trim()))
            .then_with(|| a.dnf.cmp(&b.dnf))
            .then_with(|| b.total.total_cmp(&a.total))
            .then_with(|| a.name.cmp(&b.name))
    });

    let mut place = 0;
    let mut current_group: Option<String> = None;
    for row in &mut rows {
        if current_group.as_deref() != Some(row.group_name.as_str()) {
            current_group = Some(row.group_name.clone());
            place = 0;
        }
        place += 1;
        row.place = place;
    }

    let mut group_sums: BTreeMap<String, f64> = BTreeMap::new();
    for row in &rows {
        let name = row.group_name.trim();
        if name.is_empty() || row.dnf {
            continue;
        }
        *group_sums.entry(name.to_string()).or_insert(0.0) += row.total;
    }
    let mut group_totals: Vec<GroupTotal> = group_sums
        .into_iter()
        .map(|(name, total)| GroupTotal {
            name,
            total,
            rank: 0,
        })
        .collect();
    group_totals.sort_by(|a, b| {
        b.total
            .total_cmp(&a.total)
            .then_with(|| group_index(&a.name).cmp(&group_index(&b.name)))
            .then_with(|| a.name.cmp(&b.name))
    });
    for (idx, group) in group_totals.iter_mut().enumerate() {
        group.rank = idx as u32 + 1;
    }

    let mut organization_sums: BTreeMap<String, f64> = BTreeMap::new();
    for row in &rows {
        let organization = row.organization.trim();
        if organization.is_empty() || row.dnf {
            continue;
        }
        *organization_sums.entry(organization.to_string()).or_insert(0.0) += row.total;
    }
    let organization_totals = organization_sums
        .into_iter()
        .map(|(name, total)| OrganizationTotal { name, total })
        .collect();

    Ok(Standings {
        rows,
        group_totals,
        organization_totals,
    })
}
