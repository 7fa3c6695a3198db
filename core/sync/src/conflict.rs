//! Direction decision and conflict description.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use notesync_common::{Error, Result};
use notesync_snapshot::DataSummary;
use notesync_storage::SnapshotMetadata;

use crate::metadata::SyncMetadata;

/// Explicit choice that settles a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// Keep local data and overwrite the remote snapshot.
    Push,
    /// Replace local records with the remote snapshot.
    Pull,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Push => f.write_str("push"),
            Resolution::Pull => f.write_str("pull"),
        }
    }
}

impl FromStr for Resolution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "push" | "local" => Ok(Resolution::Push),
            "pull" | "remote" => Ok(Resolution::Pull),
            other => Err(Error::InvalidInput(format!(
                "Unknown resolution '{}' (expected push or pull)",
                other
            ))),
        }
    }
}

/// Everything a user needs to pick a [`Resolution`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictDetails {
    pub remote: SnapshotMetadata,
    pub local: DataSummary,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub local_changed_at: Option<DateTime<Utc>>,
    pub detected_at: DateTime<Utc>,
}

/// What one sync attempt should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Pull,
    Push,
    Conflict,
    UpToDate,
}

/// Whether `remote` changed since the last sync.
///
/// The snapshot this device last pushed or pulled is never newer.
pub fn remote_is_newer(remote: Option<&SnapshotMetadata>, metadata: &SyncMetadata) -> bool {
    match remote {
        Some(remote) => {
            metadata.remote_snapshot_id.as_deref() != Some(remote.id.as_str())
                && remote.modified_time > metadata.last_sync_or_epoch()
        }
        None => false,
    }
}

pub fn local_is_newer(local_changed_at: Option<DateTime<Utc>>, metadata: &SyncMetadata) -> bool {
    local_changed_at.is_some_and(|ts| ts > metadata.last_sync_or_epoch())
}

/// Last-writer-wins decision from metadata alone.
pub fn decide(
    remote: Option<&SnapshotMetadata>,
    local_changed_at: Option<DateTime<Utc>>,
    metadata: &SyncMetadata,
) -> Direction {
    match (
        remote_is_newer(remote, metadata),
        local_is_newer(local_changed_at, metadata),
    ) {
        (true, true) => Direction::Conflict,
        (true, false) => Direction::Pull,
        (false, true) => Direction::Push,
        (false, false) => Direction::UpToDate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use notesync_common::DeviceId;
    use notesync_storage::SnapshotProperties;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    fn remote(id: &str, day: u32) -> SnapshotMetadata {
        SnapshotMetadata {
            id: id.to_string(),
            modified_time: at(day),
            size: 10,
            properties: SnapshotProperties::default(),
        }
    }

    fn synced_at(day: Option<u32>, remote_id: Option<&str>) -> SyncMetadata {
        let mut metadata = SyncMetadata::new(DeviceId::generate());
        metadata.last_sync_at = day.map(at);
        metadata.remote_snapshot_id = remote_id.map(str::to_string);
        metadata
    }

    #[test]
    fn test_decision_table() {
        let metadata = synced_at(Some(5), None);

        assert_eq!(decide(None, None, &metadata), Direction::UpToDate);
        assert_eq!(decide(None, Some(at(6)), &metadata), Direction::Push);
        assert_eq!(decide(Some(&remote("r", 6)), Some(at(4)), &metadata), Direction::Pull);
        assert_eq!(
            decide(Some(&remote("r", 6)), Some(at(7)), &metadata),
            Direction::Conflict
        );
        assert_eq!(
            decide(Some(&remote("r", 5)), Some(at(5)), &metadata),
            Direction::UpToDate
        );
    }

    #[test]
    fn test_never_synced_compares_against_epoch() {
        let metadata = synced_at(None, None);
        assert_eq!(decide(None, Some(at(2)), &metadata), Direction::Push);
        assert_eq!(decide(Some(&remote("r", 1)), None, &metadata), Direction::Pull);
    }

    #[test]
    fn test_known_remote_is_never_newer() {
        let metadata = synced_at(Some(1), Some("mine"));
        assert!(!remote_is_newer(Some(&remote("mine", 9)), &metadata));
        assert!(remote_is_newer(Some(&remote("theirs", 9)), &metadata));
    }

    #[test]
    fn test_resolution_parsing() {
        assert_eq!("push".parse::<Resolution>().unwrap(), Resolution::Push);
        assert_eq!("Remote".parse::<Resolution>().unwrap(), Resolution::Pull);
        assert!("merge".parse::<Resolution>().is_err());
        assert_eq!(Resolution::Pull.to_string(), "pull");
    }
}
