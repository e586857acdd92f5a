use std::collections::{hash_map::Entry, HashMap};

use crate::models::Project;

/// Merge cached and remote project lists by id.
///
/// When an id appears more than once the fresher copy wins; on a tie the
/// remote copy is kept. The result is ordered newest first.
pub fn merge_projects(local: Vec<Project>, remote: Vec<Project>) -> Vec<Project> {
    let mut by_id: HashMap<String, Project> = HashMap::with_capacity(local.len() + remote.len());

    for project in local {
        keep_fresher(&mut by_id, project, false);
    }
    for project in remote {
        keep_fresher(&mut by_id, project, true);
    }

    let mut merged: Vec<Project> = by_id.into_values().collect();
    merged.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    merged
}

fn keep_fresher(by_id: &mut HashMap<String, Project>, candidate: Project, wins_ties: bool) {
    match by_id.entry(candidate.id.clone()) {
        Entry::Vacant(slot) => {
            slot.insert(candidate);
        }
        Entry::Occupied(mut slot) => {
            let held = slot.get().freshness();
            let incoming = candidate.freshness();
            if incoming > held || (wins_ties && incoming == held) {
                slot.insert(candidate);
            }
        }
    }
}
