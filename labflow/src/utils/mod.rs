//! Small shared utilities: timestamps and identifiers.

use chrono::Utc;
use uuid::Uuid;

/// Represents a UTC timestamp.
pub type Timestamp = chrono::DateTime<Utc>;

/// Returns the current UTC time as an ISO 8601 formatted string.
///
/// Format: `YYYY-MM-DDTHH:MM:SS.ffffff+00:00`.
#[must_use]
pub fn iso_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

/// Returns the current UTC time in a compact, ref-safe form.
///
/// Used as the timestamp component of fork branch names, so it must not
/// contain characters that are invalid in a branch ref.
#[must_use]
pub fn compact_timestamp() -> String {
    Utc::now().format("%Y%m%dT%H%M%S").to_string()
}

/// Generates a new random UUID string.
#[must_use]
pub fn generate_uuid() -> String {
    Uuid::new_v4().to_string()
}

/// Generates a short id suitable for run and iteration labels.
#[must_use]
pub fn short_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}
