use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner on stderr, or a hidden bar when `quiet` is set.
pub fn spinner(message: &str, quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let s = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
    s.set_style(style);
    s.set_message(message.to_string());
    s.enable_steady_tick(Duration::from_millis(80));
    s
}

/// Parse a timestamp from a state file.
///
/// Accepts RFC 3339 (what we write), plus naive `YYYY-MM-DDTHH:MM:SS[.f]` and bare
/// `YYYY-MM-DD`, both read as local time.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Local>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Local));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Local.from_local_datetime(&naive).earliest();
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()?;
    Local.from_local_datetime(&date.and_hms_opt(0, 0, 0)?).earliest()
}

pub fn format_timestamp(ts: &DateTime<Local>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, false)
}

/// Serde adapter for optional local timestamps, see [`parse_timestamp`].
pub mod optional_timestamp {
    use chrono::{DateTime, Local};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Local>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => serializer.serialize_some(&super::format_timestamp(ts)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Local>>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|value| {
            super::parse_timestamp(&value)
                .ok_or_else(|| D::Error::custom(format!("invalid timestamp: {value:?}")))
        })
        .transpose()
    }
}

/// Whole days between `ts` and `now`, rounded down.
pub fn days_ago(ts: &DateTime<Local>, now: &DateTime<Local>) -> i64 {
    (*now - *ts).num_seconds().div_euclid(86_400)
}
