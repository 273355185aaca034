//! History lookup over a consistent snapshot of a record's versions
//!
//! [`Versions`] owns an ascending snapshot taken under the record's lock.
//! Every query resolves its locator to a sequence first and then slices the
//! snapshot, so bad input always degrades to `None` or an empty slice.

use chrono::{DateTime, Utc};

use crate::attributes::RecordId;
use crate::locator::{Endpoint, Locator, VersionRef};
use crate::replay;
use crate::version::Version;

/// How a timestamp earlier than the whole history resolves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeRule {
    /// No version existed yet, so nothing is found
    Exact,
    /// The record's baseline: the first sequence
    DefaultToFirst,
}

/// Ordered versions of one record
#[derive(Debug, Clone)]
pub struct Versions {
    record_id: RecordId,
    versions: Vec<Version>,
}

impl Versions {
    /// Wrap a snapshot; `versions` must be ascending by sequence
    pub fn new(record_id: RecordId, versions: Vec<Version>) -> Self {
        debug_assert!(versions.windows(2).all(|w| w[0].sequence < w[1].sequence));
        Self {
            record_id,
            versions,
        }
    }

    pub fn record_id(&self) -> &RecordId {
        &self.record_id
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Version> {
        self.versions.iter()
    }

    pub fn as_slice(&self) -> &[Version] {
        &self.versions
    }

    pub fn into_vec(self) -> Vec<Version> {
        self.versions
    }

    pub fn first(&self) -> Option<&Version> {
        self.versions.first()
    }

    pub fn last(&self) -> Option<&Version> {
        self.versions.last()
    }

    /// Version with exactly this sequence
    pub fn get(&self, sequence: u64) -> Option<&Version> {
        self.versions
            .binary_search_by_key(&sequence, |v| v.sequence)
            .ok()
            .map(|i| &self.versions[i])
    }

    /// Sequence the record logically stands at (see [`replay::effective_origin`])
    pub fn current_position(&self) -> u64 {
        replay::effective_origin(self.last())
    }

    /// Resolve a locator to a sequence of this history
    pub fn resolve(&self, locator: &Locator, rule: TimeRule) -> Option<u64> {
        match locator {
            Locator::Version(reference) => self.resolve_reference(reference),
            Locator::Endpoint(endpoint) => self.resolve_endpoint(*endpoint),
            Locator::Tag(tag) => self.resolve_tag(tag),
            Locator::Sequence(n) => self.resolve_number(*n),
            Locator::Timestamp(time) => self.resolve_time(time, rule),
            Locator::Absent => None,
        }
    }

    fn resolve_reference(&self, reference: &VersionRef) -> Option<u64> {
        if reference.record_id != self.record_id {
            return None;
        }
        self.get(reference.sequence).map(|v| v.sequence)
    }

    fn resolve_endpoint(&self, endpoint: Endpoint) -> Option<u64> {
        let version = match endpoint {
            Endpoint::First => self.first(),
            Endpoint::Last => self.last(),
        };
        version.map(|v| v.sequence)
    }

    fn resolve_tag(&self, tag: &str) -> Option<u64> {
        self.versions
            .iter()
            .rev()
            .find(|v| v.tag.as_deref() == Some(tag))
            .map(|v| v.sequence)
    }

    fn resolve_number(&self, n: f64) -> Option<u64> {
        if !n.is_finite() || n < 1.0 {
            return None;
        }
        self.get(n.floor() as u64).map(|v| v.sequence)
    }

    fn resolve_time(&self, time: &DateTime<Utc>, rule: TimeRule) -> Option<u64> {
        let found = self
            .versions
            .iter()
            .rev()
            .find(|v| v.created_at <= *time)
            .map(|v| v.sequence);
        match (found, rule) {
            (Some(sequence), _) => Some(sequence),
            (None, TimeRule::Exact) => None,
            (None, TimeRule::DefaultToFirst) => self.first().map(|v| v.sequence),
        }
    }

    /// Version at a locator; nothing for times before the history began
    pub fn at(&self, locator: impl Into<Locator>) -> Option<&Version> {
        self.resolve(&locator.into(), TimeRule::Exact)
            .and_then(|sequence| self.get(sequence))
    }

    /// Sequence at a locator; times before the history began give the first sequence
    pub fn iteration_at(&self, locator: impl Into<Locator>) -> Option<u64> {
        self.resolve(&locator.into(), TimeRule::DefaultToFirst)
    }

    /// Versions between two locators, inclusive, in either bound order
    pub fn between(&self, a: impl Into<Locator>, b: impl Into<Locator>) -> &[Version] {
        let (Some(a), Some(b)) = (self.iteration_at(a), self.iteration_at(b)) else {
            return &[];
        };
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        let start = self.versions.partition_point(|v| v.sequence < low);
        let end = self.versions.partition_point(|v| v.sequence <= high);
        &self.versions[start..end]
    }

    /// Versions strictly before a locator
    pub fn before(&self, locator: impl Into<Locator>) -> &[Version] {
        match self.iteration_at(locator) {
            Some(sequence) => {
                let end = self.versions.partition_point(|v| v.sequence < sequence);
                &self.versions[..end]
            }
            None => &[],
        }
    }

    /// Versions strictly after a locator
    pub fn after(&self, locator: impl Into<Locator>) -> &[Version] {
        match self.iteration_at(locator) {
            Some(sequence) => {
                let start = self.versions.partition_point(|v| v.sequence <= sequence);
                &self.versions[start..]
            }
            None => &[],
        }
    }
}

impl<'a> IntoIterator for &'a Versions {
    type Item = &'a Version;
    type IntoIter = std::slice::Iter<'a, Version>;

    fn into_iter(self) -> Self::IntoIter {
        self.versions.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::Changeset;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    /// `count` versions, one hour apart, tagged with their sequence
    fn history(count: u64) -> Versions {
        let record_id = RecordId::new("user-1");
        let versions = (1..=count)
            .map(|sequence| Version {
                record_id: record_id.clone(),
                sequence,
                changeset: Changeset::new(),
                tag: Some(sequence.to_string()),
                created_at: base_time() + Duration::hours(sequence as i64),
                reverted_to: None,
            })
            .collect();
        Versions::new(record_id, versions)
    }

    fn time_of(sequence: u64) -> DateTime<Utc> {
        base_time() + Duration::hours(sequence as i64)
    }

    fn sequences(slice: &[Version]) -> Vec<u64> {
        slice.iter().map(|v| v.sequence).collect()
    }

    #[test]
    fn test_at_by_sequence_tag_and_time() {
        let versions = history(4);
        for sequence in 1..=4u64 {
            assert_eq!(versions.at(sequence).unwrap().sequence, sequence);
            assert_eq!(versions.at(sequence.to_string()).unwrap().sequence, sequence);
            assert_eq!(versions.at(time_of(sequence)).unwrap().sequence, sequence);
            assert_eq!(
                versions
                    .at(time_of(sequence) + Duration::minutes(30))
                    .unwrap()
                    .sequence,
                sequence
            );
        }
    }

    #[test]
    fn test_time_before_history() {
        let versions = history(4);
        let early = time_of(1) - Duration::seconds(1);

        assert!(versions.at(early).is_none());
        assert_eq!(versions.iteration_at(early), Some(1));
    }

    #[test]
    fn test_endpoints_and_symbols() {
        let versions = history(4);
        assert_eq!(versions.at(Locator::first()).unwrap().sequence, 1);
        assert_eq!(versions.at(Locator::last()).unwrap().sequence, 4);
        assert_eq!(versions.iteration_at(Locator::symbol("last")), Some(4));
        assert_eq!(versions.iteration_at(Locator::symbol("INVALID")), None);
    }

    #[test]
    fn test_fractional_sequence_floors() {
        let versions = history(4);
        for sequence in 1..=4u64 {
            assert_eq!(versions.iteration_at(sequence as f64 + 0.5), Some(sequence));
        }
        assert_eq!(versions.iteration_at(0.5), None);
        assert_eq!(versions.iteration_at(5), None);
        assert_eq!(versions.iteration_at(f64::NAN), None);
        assert_eq!(versions.iteration_at(-1), None);
    }

    #[test]
    fn test_unknown_tag_and_absent() {
        let versions = history(4);
        assert_eq!(versions.iteration_at("INVALID"), None);
        assert!(versions.at(Locator::Absent).is_none());
        assert!(versions.at(None::<u64>).is_none());
    }

    #[test]
    fn test_duplicate_tags_prefer_latest() {
        let mut versions = history(4).into_vec();
        versions[0].tag = Some("release".to_string());
        versions[2].tag = Some("release".to_string());
        let versions = Versions::new(RecordId::new("user-1"), versions);

        assert_eq!(versions.iteration_at("release"), Some(3));
    }

    #[test]
    fn test_tags_are_case_sensitive() {
        let mut versions = history(2).into_vec();
        versions[1].tag = Some("Release".to_string());
        let versions = Versions::new(RecordId::new("user-1"), versions);

        assert_eq!(versions.iteration_at("Release"), Some(2));
        assert_eq!(versions.iteration_at("release"), None);
    }

    #[test]
    fn test_version_reference() {
        let versions = history(4);
        let second = versions.at(2).unwrap().clone();
        assert_eq!(versions.at(&second).unwrap().sequence, 2);
        assert_eq!(versions.iteration_at(&second), Some(2));

        let mut foreign = second.clone();
        foreign.record_id = RecordId::new("user-2");
        assert!(versions.at(&foreign).is_none());
    }

    #[test]
    fn test_ranges_mix_sequences_and_times() {
        let versions = history(4);
        assert_eq!(sequences(versions.between(2, time_of(3))), vec![2, 3]);
        assert_eq!(sequences(versions.between(time_of(4), 1)), vec![1, 2, 3, 4]);
        assert_eq!(sequences(versions.before(3)), vec![1, 2]);
        assert_eq!(sequences(versions.after(time_of(2))), vec![3, 4]);
    }

    #[test]
    fn test_ranges_with_unresolvable_bounds() {
        let versions = history(4);
        assert!(versions.between(2, Locator::Absent).is_empty());
        assert!(versions.between(Locator::Absent, time_of(2)).is_empty());
        assert!(versions.between(Locator::Absent, Locator::Absent).is_empty());
        assert!(versions.before(Locator::Absent).is_empty());
        assert!(versions.after(Locator::Absent).is_empty());
    }

    #[test]
    fn test_empty_history() {
        let versions = Versions::new(RecordId::new("user-1"), vec![]);
        assert!(versions.at(Locator::first()).is_none());
        assert!(versions.at(Locator::last()).is_none());
        assert_eq!(versions.iteration_at(base_time()), None);
        assert!(versions.between(1, 2).is_empty());
        assert_eq!(versions.current_position(), 1);
    }

    proptest! {
        #[test]
        fn prop_between_is_symmetric(count in 1u64..20, a in 0u64..25, b in 0u64..25) {
            let versions = history(count);
            prop_assert_eq!(
                sequences(versions.between(a, b)),
                sequences(versions.between(b, a))
            );
        }

        #[test]
        fn prop_before_and_after_partition(count in 1u64..20, x in 1u64..20) {
            let versions = history(count);
            prop_assume!(x <= count);

            let mut joined = sequences(versions.before(x));
            joined.push(x);
            joined.extend(sequences(versions.after(x)));
            prop_assert_eq!(joined, sequences(versions.as_slice()));
        }

        #[test]
        fn prop_time_lookup_finds_latest_not_after(count in 1u64..20, minutes in 0i64..(20 * 60)) {
            let versions = history(count);
            let time = base_time() + Duration::hours(1) + Duration::minutes(minutes);
            let expected = (1 + minutes / 60).min(count as i64) as u64;
            prop_assert_eq!(versions.iteration_at(time), Some(expected));
            prop_assert_eq!(versions.at(time).map(|v| v.sequence), Some(expected));
        }
    }
}
