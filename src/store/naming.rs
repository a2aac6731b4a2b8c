//! Snapshot naming convention
//!
//! Snapshots are named `<project>_backup_<YYYYMMDD>_<HHMMSS>[_NN].<ext>`. The
//! optional two-digit sequence suffix only appears when two snapshots are
//! created within the same second. Because every field is fixed-width and
//! zero-padded, sorting names lexicographically sorts them chronologically.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};

/// Highest sequence suffix tried before giving up on a timestamp
pub const MAX_SEQUENCE: u8 = 99;

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// A parsed snapshot file name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotName {
    project: String,
    timestamp: NaiveDateTime,
    sequence: u8,
    extension: String,
}

impl SnapshotName {
    /// Build the name for a snapshot taken at `created_at`
    ///
    /// Sub-second precision is dropped; uniqueness within a second comes from
    /// the sequence suffix.
    pub fn new(
        project: impl Into<String>,
        extension: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let timestamp = created_at.naive_utc();
        let timestamp = timestamp.with_nanosecond(0).unwrap_or(timestamp);
        Self {
            project: project.into(),
            timestamp,
            sequence: 0,
            extension: extension.into(),
        }
    }

    /// Same timestamp, different sequence suffix
    pub fn with_sequence(&self, sequence: u8) -> Self {
        Self {
            sequence,
            ..self.clone()
        }
    }

    /// Parse a file name belonging to `project` with extension `extension`
    ///
    /// Returns `None` for anything that is not a complete snapshot name,
    /// including partial files, pins and manifests.
    pub fn parse(project: &str, extension: &str, file_name: &str) -> Option<Self> {
        let rest = file_name
            .strip_prefix(project)?
            .strip_prefix("_backup_")?
            .strip_suffix(extension)?
            .strip_suffix('.')?;
        let (timestamp, sequence) = parse_stamp(rest)?;

        Some(Self {
            project: project.to_string(),
            timestamp,
            sequence,
            extension: extension.to_string(),
        })
    }

    /// Interpret an operator-supplied identifier
    ///
    /// Accepts a full file name, a file name without the extension, or just the
    /// `YYYYMMDD_HHMMSS[_NN]` stamp.
    pub fn from_identifier(project: &str, extension: &str, identifier: &str) -> Option<Self> {
        let identifier = identifier.trim();
        if let Some(name) = Self::parse(project, extension, identifier) {
            return Some(name);
        }

        let with_ext = format!("{}.{}", identifier, extension);
        if let Some(name) = Self::parse(project, extension, &with_ext) {
            return Some(name);
        }

        let (timestamp, sequence) = parse_stamp(identifier)?;
        Some(Self {
            project: project.to_string(),
            timestamp,
            sequence,
            extension: extension.to_string(),
        })
    }

    /// The on-disk file name
    pub fn file_name(&self) -> String {
        let stamp = self.timestamp.format(TIMESTAMP_FORMAT);
        if self.sequence == 0 {
            format!("{}_backup_{}.{}", self.project, stamp, self.extension)
        } else {
            format!(
                "{}_backup_{}_{:02}.{}",
                self.project, stamp, self.sequence, self.extension
            )
        }
    }

    /// Hidden name the dump is streamed into before publication
    pub fn partial_file_name(&self) -> String {
        format!(".{}.partial", self.file_name())
    }

    /// Sidecar manifest written alongside a complete snapshot
    pub fn manifest_file_name(&self) -> String {
        format!("{}.meta.json", self.file_name())
    }

    /// Prefix shared by all pin markers for this snapshot
    pub fn pin_prefix(&self) -> String {
        format!(".{}.pin-", self.file_name())
    }

    /// When the snapshot was created (second resolution)
    pub fn created_at(&self) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(self.timestamp, Utc)
    }

    /// Same-second tie-breaker (0 for the first snapshot of a second)
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Whether both names were taken within the same second
    pub fn same_second(&self, other: &SnapshotName) -> bool {
        self.timestamp == other.timestamp
    }
}

impl fmt::Display for SnapshotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

impl Ord for SnapshotName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then(self.sequence.cmp(&other.sequence))
            .then_with(|| self.file_name().cmp(&other.file_name()))
    }
}

impl PartialOrd for SnapshotName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Parse `YYYYMMDD_HHMMSS` with an optional `_NN` suffix
fn parse_stamp(stamp: &str) -> Option<(NaiveDateTime, u8)> {
    let parts: Vec<&str> = stamp.split('_').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return None;
    }

    let date_part = parts[0];
    let time_part = parts[1];
    if date_part.len() != 8 || time_part.len() != 6 {
        return None;
    }
    if !date_part.bytes().chain(time_part.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }

    let sequence = match parts.get(2) {
        Some(seq) if seq.len() == 2 && seq.bytes().all(|b| b.is_ascii_digit()) => {
            let seq: u8 = seq.parse().ok()?;
            if seq == 0 {
                return None;
            }
            seq
        }
        Some(_) => return None,
        None => 0,
    };

    let year: i32 = date_part[0..4].parse().ok()?;
    let month: u32 = date_part[4..6].parse().ok()?;
    let day: u32 = date_part[6..8].parse().ok()?;
    let hour: u32 = time_part[0..2].parse().ok()?;
    let minute: u32 = time_part[2..4].parse().ok()?;
    let second: u32 = time_part[4..6].parse().ok()?;

    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let time = NaiveTime::from_hms_opt(hour, minute, second)?;

    Some((NaiveDateTime::new(date, time), sequence))
}
