//! Locators: every way a caller can point at a place in history

use chrono::{DateTime, Utc};
use std::str::FromStr;

use crate::attributes::RecordId;
use crate::version::Version;

/// Symbolic ends of a record's history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    First,
    Last,
}

impl FromStr for Endpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first" => Ok(Endpoint::First),
            "last" => Ok(Endpoint::Last),
            other => Err(format!("unknown endpoint '{}'", other)),
        }
    }
}

/// A reference to an already-fetched version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRef {
    pub record_id: RecordId,
    pub sequence: u64,
}

/// A point in a record's history, in any of the accepted forms
#[derive(Debug, Clone, PartialEq)]
pub enum Locator {
    /// A previously fetched version
    Version(VersionRef),
    /// `first` or `last`
    Endpoint(Endpoint),
    /// Exact tag match; the most recent tagged version wins
    Tag(String),
    /// Sequence number; fractional values are floored
    Sequence(f64),
    /// Latest version created at or before this instant
    Timestamp(DateTime<Utc>),
    /// Resolves to nothing
    Absent,
}

impl Locator {
    /// Locator for a named symbol; anything but `first`/`last` resolves to nothing
    pub fn symbol(name: &str) -> Self {
        name.parse()
            .map(Locator::Endpoint)
            .unwrap_or(Locator::Absent)
    }

    pub fn first() -> Self {
        Locator::Endpoint(Endpoint::First)
    }

    pub fn last() -> Self {
        Locator::Endpoint(Endpoint::Last)
    }

    pub fn tag(tag: impl Into<String>) -> Self {
        Locator::Tag(tag.into())
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Locator::Version(v) => write!(f, "version {} of {}", v.sequence, v.record_id),
            Locator::Endpoint(Endpoint::First) => write!(f, "first"),
            Locator::Endpoint(Endpoint::Last) => write!(f, "last"),
            Locator::Tag(tag) => write!(f, "tag '{}'", tag),
            Locator::Sequence(n) => write!(f, "sequence {}", n),
            Locator::Timestamp(t) => write!(f, "time {}", t.to_rfc3339()),
            Locator::Absent => write!(f, "nothing"),
        }
    }
}

impl From<&Version> for Locator {
    fn from(version: &Version) -> Self {
        Locator::Version(VersionRef {
            record_id: version.record_id.clone(),
            sequence: version.sequence,
        })
    }
}

impl From<Endpoint> for Locator {
    fn from(endpoint: Endpoint) -> Self {
        Locator::Endpoint(endpoint)
    }
}

impl From<u64> for Locator {
    fn from(n: u64) -> Self {
        Locator::Sequence(n as f64)
    }
}

impl From<u32> for Locator {
    fn from(n: u32) -> Self {
        Locator::Sequence(f64::from(n))
    }
}

impl From<i64> for Locator {
    fn from(n: i64) -> Self {
        Locator::Sequence(n as f64)
    }
}

impl From<i32> for Locator {
    fn from(n: i32) -> Self {
        Locator::Sequence(f64::from(n))
    }
}

impl From<f64> for Locator {
    fn from(n: f64) -> Self {
        Locator::Sequence(n)
    }
}

impl From<&str> for Locator {
    fn from(tag: &str) -> Self {
        Locator::Tag(tag.to_string())
    }
}

impl From<String> for Locator {
    fn from(tag: String) -> Self {
        Locator::Tag(tag)
    }
}

impl From<DateTime<Utc>> for Locator {
    fn from(time: DateTime<Utc>) -> Self {
        Locator::Timestamp(time)
    }
}

impl<T: Into<Locator>> From<Option<T>> for Locator {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Locator::Absent)
    }
}
