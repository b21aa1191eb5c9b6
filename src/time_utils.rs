// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared helpers for date/time formatting.

use chrono::{DateTime, SecondsFormat, Utc};

/// Format a UTC timestamp as RFC3339 using a `Z` suffix.
pub fn format_utc_rfc3339(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Current time as an RFC3339 string, the form every stored timestamp uses.
pub fn now_rfc3339() -> String {
    format_utc_rfc3339(Utc::now())
}

/// Milliseconds since the Unix epoch, used to make blob names unique.
pub fn unix_millis(date: DateTime<Utc>) -> i64 {
    date.timestamp_millis()
}
