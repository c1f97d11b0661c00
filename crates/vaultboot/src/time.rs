//! Time utilities for Vaultboot.
//!
//! Key files carry an RFC 3339 creation stamp (second precision, `Z`
//! suffix, the same shape `age-keygen` writes); policy backups carry a
//! compact sortable stamp.

use chrono::{DateTime, SecondsFormat, Utc};

/// Return the current time.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Format a timestamp the way it appears in a key file's `# created:` line.
pub fn to_key_file_stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a `# created:` stamp. Returns `None` for anything unparsable.
pub fn from_key_file_stamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Compact stamp used in backup file names, e.g. `20260119143005`.
pub fn backup_stamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d%H%M%S").to_string()
}
