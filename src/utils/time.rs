// SPDX-License-Identifier: GPL-3.0-only
use chrono::{DateTime, SecondsFormat, Utc};

/// Current time as fixed-width ISO-8601 with millisecond precision and a `Z`
/// suffix, e.g. `2024-05-01T12:30:00.000Z`.
///
/// Timestamps in this format order correctly under plain string comparison,
/// which the reconciler relies on.
pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
