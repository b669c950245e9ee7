//! Snapshot naming.
//!
//! A snapshot is stored as `{index}.{host}.{timestamp}.{namespace}`, with the
//! index zero-padded and the timestamp fixed at 14 digits, so names of one
//! series sort chronologically as plain strings.

use chrono::NaiveDateTime;
use std::cmp::Ordering;
use std::fmt;

/// Timestamp layout embedded in snapshot names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

const TIMESTAMP_LEN: usize = 14;

/// Padding width of the sequence index for a given `keep`.
pub fn padding_width(keep: usize) -> usize {
    keep.to_string().len().max(2)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotId {
    pub sequence_index: u32,
    pub width: usize,
    pub host_label: String,
    pub timestamp: NaiveDateTime,
    pub namespace: String,
}

impl SnapshotId {
    /// Identifier for a new snapshot taken at `timestamp`.
    pub fn new(timestamp: NaiveDateTime, host_label: &str, namespace: &str, keep: usize) -> Self {
        Self {
            sequence_index: 0,
            width: padding_width(keep),
            host_label: host_label.to_string(),
            timestamp: strip_subseconds(timestamp),
            namespace: namespace.to_string(),
        }
    }

    /// Parse a store entry name belonging to `namespace`.
    ///
    /// Host labels may contain dots, so the namespace is matched as a known
    /// suffix and the timestamp as the last remaining segment.
    pub fn parse(name: &str, namespace: &str) -> Option<Self> {
        let rest = name.strip_suffix(namespace)?.strip_suffix('.')?;
        let (index, rest) = rest.split_once('.')?;
        let (host, stamp) = rest.rsplit_once('.')?;

        if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if host.is_empty() || stamp.len() != TIMESTAMP_LEN {
            return None;
        }
        if !stamp.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        Some(Self {
            sequence_index: index.parse().ok()?,
            width: index.len(),
            host_label: host.to_string(),
            timestamp: NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?,
            namespace: namespace.to_string(),
        })
    }

    /// Whether this snapshot is part of the `host` / `namespace` series.
    pub fn belongs_to(&self, host_label: &str, namespace: &str) -> bool {
        self.host_label == host_label && self.namespace == namespace
    }

    pub fn name(&self) -> String {
        self.to_string()
    }
}

fn strip_subseconds(timestamp: NaiveDateTime) -> NaiveDateTime {
    use chrono::Timelike;
    timestamp.with_nanosecond(0).unwrap_or(timestamp)
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:0width$}.{}.{}.{}",
            self.sequence_index,
            self.host_label,
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.namespace,
            width = self.width
        )
    }
}

impl Ord for SnapshotId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then(self.sequence_index.cmp(&other.sequence_index))
            .then_with(|| self.host_label.cmp(&other.host_label))
            .then_with(|| self.namespace.cmp(&other.namespace))
            .then(self.width.cmp(&other.width))
    }
}

impl PartialOrd for SnapshotId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
