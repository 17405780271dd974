use std::convert::TryFrom;

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, NaiveDateTime, Utc};

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

/// Local timestamps are stored twice: epoch seconds for indexing and an
/// RFC 3339 string for humans.
pub fn timestamp_pair(at: DateTime<Utc>) -> (i64, String) {
    (at.timestamp(), at.to_rfc3339())
}

pub fn epoch_now() -> i64 {
    Utc::now().timestamp()
}

/// Collapse a stored (epoch, ISO) pair into one timestamp.
///
/// An RFC 3339 string wins when it agrees with the epoch to the second. A
/// naive ISO string (no offset) carries no zone, so the epoch is used. A
/// string that does not parse at all also defers to the epoch.
pub fn collapse_timestamp(epoch: i64, iso: Option<&str>, field: &str) -> Result<DateTime<Utc>> {
    let from_epoch = DateTime::<Utc>::from_timestamp(epoch, 0);

    if let Some(raw) = iso {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            let parsed = parsed.with_timezone(&Utc);
            if parsed.timestamp() != epoch {
                bail!("{field}: '{raw}' disagrees with epoch {epoch}");
            }
            return Ok(parsed);
        }
        if NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").is_err() {
            log::debug!("{field}: unparseable ISO '{raw}', using epoch {epoch}");
        }
    }

    from_epoch.ok_or_else(|| anyhow!("{field}: epoch {epoch} is out of range"))
}

pub fn collapse_optional(
    epoch: Option<i64>,
    iso: Option<&str>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    match epoch {
        Some(epoch) => collapse_timestamp(epoch, iso, field).map(Some),
        None => Ok(None),
    }
}

/// SQLite stores booleans as 0/1 integers; anything else is corrupt.
pub fn int_to_bool(value: i64, field: &str) -> Result<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(anyhow!("{field} holds non-boolean value {other}")),
    }
}
