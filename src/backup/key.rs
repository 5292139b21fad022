//! Backup kinds and store key layout.
//!
//! Keys look like `<kind>_backup_<userId>[_<timestampMs>]`. Periodic and
//! emergency backups use one slot per user and omit the timestamp.

use serde::{Deserialize, Serialize};
use std::fmt;

const MARKER: &str = "_backup_";

/// What triggered a backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    /// Session start or end.
    Session,
    /// Timer while a session runs, or the end of a debounce window.
    Periodic,
    /// A designated significant event.
    Event,
    /// Page suspend.
    Emergency,
    /// Key with an unrecognised prefix.
    Unknown,
}

impl BackupKind {
    /// Key prefix.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Periodic => "periodic",
            Self::Event => "event",
            Self::Emergency => "emergency",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a key prefix; anything unrecognised is [`BackupKind::Unknown`].
    #[must_use]
    pub fn from_prefix(prefix: &str) -> Self {
        match prefix {
            "session" => Self::Session,
            "periodic" => Self::Periodic,
            "event" => Self::Event,
            "emergency" => Self::Emergency,
            _ => Self::Unknown,
        }
    }

    /// Whether keys of this kind carry a timestamp suffix.
    #[must_use]
    pub const fn is_timestamped(self) -> bool {
        !matches!(self, Self::Periodic | Self::Emergency)
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured form of a backup store key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackupKey {
    /// Backup kind.
    pub kind: BackupKind,
    /// Participant.
    pub user_id: String,
    /// Creation time in unix milliseconds, for timestamped kinds.
    pub timestamp: Option<i64>,
}

impl BackupKey {
    /// Key for a backup of `kind` written at `timestamp_ms`.
    #[must_use]
    pub fn new(kind: BackupKind, user_id: impl Into<String>, timestamp_ms: i64) -> Self {
        Self {
            kind,
            user_id: user_id.into(),
            timestamp: kind.is_timestamped().then_some(timestamp_ms),
        }
    }

    /// Serialized store key.
    #[must_use]
    pub fn to_store_key(&self) -> String {
        match self.timestamp {
            Some(ts) => format!("{}{MARKER}{}_{ts}", self.kind, self.user_id),
            None => format!("{}{MARKER}{}", self.kind, self.user_id),
        }
    }

    /// Parse a store key. Returns `None` for keys without the backup marker.
    #[must_use]
    pub fn parse(key: &str) -> Option<Self> {
        let (prefix, rest) = key.split_once(MARKER)?;
        let kind = BackupKind::from_prefix(prefix);

        let (user_id, timestamp) = match (kind, rest.rsplit_once('_')) {
            (BackupKind::Periodic | BackupKind::Emergency, _) | (_, None) => (rest, None),
            (_, Some((user, suffix))) => match suffix.parse::<i64>() {
                Ok(ts) => (user, Some(ts)),
                Err(_) => (rest, None),
            },
        };
        if user_id.is_empty() {
            return None;
        }
        Some(Self {
            kind,
            user_id: user_id.to_string(),
            timestamp,
        })
    }

    /// The same key one millisecond later.
    #[must_use]
    pub fn bumped(&self) -> Self {
        Self {
            timestamp: self.timestamp.map(|ts| ts + 1),
            ..self.clone()
        }
    }
}

impl fmt::Display for BackupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_store_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(
            BackupKey::new(BackupKind::Session, "alice", 1700).to_store_key(),
            "session_backup_alice_1700"
        );
        assert_eq!(
            BackupKey::new(BackupKind::Periodic, "alice", 1700).to_store_key(),
            "periodic_backup_alice"
        );
        assert_eq!(
            BackupKey::new(BackupKind::Emergency, "alice", 1700).to_store_key(),
            "emergency_backup_alice"
        );
    }

    #[test]
    fn test_parse_keeps_underscores_in_user_id() {
        let key = BackupKey::parse("event_backup_p_42_1700000000000").unwrap();
        assert_eq!(key.kind, BackupKind::Event);
        assert_eq!(key.user_id, "p_42");
        assert_eq!(key.timestamp, Some(1_700_000_000_000));

        let slot = BackupKey::parse("periodic_backup_p_42").unwrap();
        assert_eq!(slot.user_id, "p_42");
        assert_eq!(slot.timestamp, None);
    }

    #[test]
    fn test_parse_unknown_prefix() {
        let key = BackupKey::parse("legacy_backup_alice_5").unwrap();
        assert_eq!(key.kind, BackupKind::Unknown);
        assert_eq!(key.timestamp, Some(5));
    }

    #[test]
    fn test_parse_rejects_non_backup_keys() {
        assert!(BackupKey::parse("session_state_alice").is_none());
        assert!(BackupKey::parse("session_backup_").is_none());
    }

    #[test]
    fn test_bumped_only_moves_timestamp() {
        let key = BackupKey::new(BackupKind::Session, "alice", 10);
        assert_eq!(key.bumped().to_store_key(), "session_backup_alice_11");
        let slot = BackupKey::new(BackupKind::Periodic, "alice", 10);
        assert_eq!(slot.bumped(), slot);
    }
}
