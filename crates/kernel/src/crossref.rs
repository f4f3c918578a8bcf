//! Cross-level actor reference fixup.
//!
//! References that cross a level boundary cannot be resolved when a level is
//! loaded in isolation. When a level becomes active, every unresolved reference
//! in the active set is matched against live actors by id; when a level is
//! removed, every reference pointing into it is nulled.

use levelflow_common::{EntityId, PackageName};
use std::collections::HashMap;

use crate::level::LevelContent;

/// Upper bound on the scratch lookup table built while matching referents.
pub const DEFAULT_TABLE_CAP: usize = 5000;

/// Outcome of a fixup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrossRefReport {
    pub total: usize,
    pub resolved: usize,
    pub unmatched: usize,
}

/// Resolve every unresolved reference held by any of `levels` against actors in `levels`.
///
/// Referents are indexed `cap` actors at a time so the scratch table never
/// grows past `cap` entries no matter how many actors are live.
pub fn resolve_refs(levels: &mut [&mut LevelContent], cap: usize) -> CrossRefReport {
    let cap = cap.max(1);

    // (level, actor, ref) positions still waiting for a referent.
    let mut pending: Vec<(usize, usize, usize, EntityId)> = Vec::new();
    for (li, level) in levels.iter().enumerate() {
        for (ai, actor) in level.actors().iter().enumerate() {
            for (ri, r) in actor.cross_level_refs.iter().enumerate() {
                if r.resolved.is_none() {
                    pending.push((li, ai, ri, r.target));
                }
            }
        }
    }
    let total = pending.len();
    if total == 0 {
        return CrossRefReport::default();
    }

    let candidates: Vec<(EntityId, usize)> = levels
        .iter()
        .enumerate()
        .flat_map(|(li, level)| {
            level
                .actors()
                .iter()
                .filter(|a| !a.state.pending_kill)
                .map(move |a| (a.id, li))
        })
        .collect();

    let mut assignments: Vec<(usize, usize, usize, usize)> = Vec::new();
    let mut table: HashMap<EntityId, usize> = HashMap::with_capacity(cap.min(candidates.len()));
    for chunk in candidates.chunks(cap) {
        if pending.is_empty() {
            break;
        }
        table.clear();
        table.extend(chunk.iter().copied());

        let mut idx = pending.len();
        while idx > 0 {
            idx -= 1;
            let (li, ai, ri, target) = pending[idx];
            if let Some(&owner) = table.get(&target) {
                assignments.push((li, ai, ri, owner));
                pending.swap_remove(idx);
            }
        }
    }

    let resolved = assignments.len();
    for (li, ai, ri, owner) in assignments {
        let owner_name = levels[owner].package().clone();
        levels[li].actors_mut()[ai].cross_level_refs[ri].resolved = Some(owner_name);
    }

    CrossRefReport {
        total,
        resolved,
        unmatched: pending.len(),
    }
}

/// Null every reference in `levels` that points into `removed`. Returns the count cleared.
pub fn clear_refs_into(levels: &mut [&mut LevelContent], removed: &PackageName) -> usize {
    let mut cleared = 0;
    for level in levels.iter_mut() {
        for actor in level.actors_mut() {
            for r in &mut actor.cross_level_refs {
                if r.resolved.as_ref() == Some(removed) {
                    r.resolved = None;
                    cleared += 1;
                }
            }
        }
    }
    cleared
}
