use std::net::SocketAddr;
use std::time::Duration;

use serde::de::{self, Deserialize, Deserializer};

/// Parses a human readable duration such as `"30s"`, `"1m30s"` or `"250ms"`.
///
/// Units: `ms`, `s`, `m`, `h`, `d`, `w`. A trailing number without a unit
/// counts as seconds. Anything unparsable contributes nothing.
pub fn to_duration(text: &str) -> Duration {
    let text = text.trim().to_ascii_lowercase();
    let mut total = Duration::ZERO;
    let mut value: Option<u64> = None;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if let Some(d) = c.to_digit(10) {
            value = Some(value.unwrap_or(0).saturating_mul(10).saturating_add(d as u64));
            continue;
        }
        let Some(v) = value.take() else {
            continue;
        };
        let unit = match c {
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                Duration::from_millis(1)
            }
            's' => Duration::from_secs(1),
            'm' => Duration::from_secs(60),
            'h' => Duration::from_secs(3600),
            'd' => Duration::from_secs(86400),
            'w' => Duration::from_secs(604800),
            _ => Duration::ZERO,
        };
        total = total.saturating_add(unit.saturating_mul(v.min(u32::MAX as u64) as u32));
    }
    if let Some(v) = value {
        total = total.saturating_add(Duration::from_secs(v));
    }
    total
}

#[inline]
pub fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let v = String::deserialize(deserializer)?;
    Ok(to_duration(&v))
}

#[inline]
pub fn deserialize_addr<'de, D>(deserializer: D) -> std::result::Result<SocketAddr, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer)?.parse::<SocketAddr>().map_err(de::Error::custom)
}
