//! Replay: reconstructing past attribute states
//!
//! Replay starts from the record's live attributes and walks history from
//! the newest version down, undoing one changeset at a time until it
//! reaches the target. The live snapshot is taken by value, so a replay
//! never observes a record that changes underneath it.

use std::collections::BTreeMap;

use crate::attributes::{AttributeMap, AttributeValue};
use crate::version::Version;

/// Attributes as they were right after `target` was created.
///
/// `versions` must be ascending by sequence and `current` must be the
/// record's live state, i.e. the state after the last of `versions`.
/// Returns `None` when `target` is not one of the given versions.
pub fn state_at(current: &AttributeMap, versions: &[Version], target: u64) -> Option<AttributeMap> {
    if !versions.iter().any(|v| v.sequence == target) {
        return None;
    }

    let mut state = current.clone();
    for version in versions.iter().rev().take_while(|v| v.sequence > target) {
        version.changeset.undo_onto(&mut state);
    }
    Some(state)
}

/// Sequence a record logically stands at, given its latest version.
///
/// A revert reports the origin it restored rather than its own sequence.
/// A record without history stands at its baseline, 1.
pub fn effective_origin(latest: Option<&Version>) -> u64 {
    latest.map(Version::original_sequence).unwrap_or(1)
}

/// Attribute name -> (value in `from`, value in `to`) for every differing attribute.
///
/// Attributes missing on one side are reported as null there.
pub fn diff_states(
    from: &AttributeMap,
    to: &AttributeMap,
) -> BTreeMap<String, (AttributeValue, AttributeValue)> {
    let mut changes = BTreeMap::new();
    for name in from.keys().chain(to.keys()) {
        let old = from.get(name);
        let new = to.get(name);
        if old != new && !changes.contains_key(name) {
            changes.insert(
                name.clone(),
                (
                    old.cloned().unwrap_or(AttributeValue::Null),
                    new.cloned().unwrap_or(AttributeValue::Null),
                ),
            );
        }
    }
    changes
}
