//! Expiration oracle.
//!
//! Decides whether a stored lock has expired according to the server's
//! own clock. Inputs are response headers from a successful HEAD/GET:
//! the `x-goog-meta-ttl` metadata written by the acquirer, the object's
//! `Last-Modified` time, and the server `Date`. The lock is expired iff
//! all three parse and `last_modified + ttl < date`.
//!
//! No local clock ever enters this decision; a handle with a skewed
//! local clock still agrees with every other contender about expiry.
//! `x-goog-expiration` is deliberately not consulted.

use chrono::{DateTime, FixedOffset};
use reqwest::header::{HeaderMap, HeaderValue, DATE, LAST_MODIFIED};

use crate::store::META_TTL_HEADER;

/// Returns true if the lock described by `headers` has expired.
///
/// Missing, zero, negative, or unparseable `ttl` metadata, or a missing
/// or unparseable timestamp, all mean "not expired".
pub(crate) fn expired(headers: &HeaderMap) -> bool {
    let Some(ttl) = header_str(headers.get(META_TTL_HEADER)).and_then(|s| s.parse::<i64>().ok())
    else {
        return false;
    };
    if ttl <= 0 {
        return false;
    }
    let Some(now) = http_date(headers.get(DATE)) else {
        return false;
    };
    let Some(modified) = http_date(headers.get(LAST_MODIFIED)) else {
        return false;
    };
    modified + chrono::Duration::seconds(ttl) < now
}

fn header_str(value: Option<&HeaderValue>) -> Option<&str> {
    value.and_then(|v| v.to_str().ok())
}

/// Parses an RFC 7231 IMF-fixdate header. The RFC 2822 grammar accepts
/// both `GMT` and numeric zone suffixes.
fn http_date(value: Option<&HeaderValue>) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc2822(header_str(value)?).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn fmt(ts: DateTime<Utc>) -> String {
        ts.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
    }

    fn headers(ttl: Option<&str>, modified: Option<DateTime<Utc>>, now: Option<DateTime<Utc>>) -> HeaderMap {
        let mut map = HeaderMap::new();
        if let Some(ttl) = ttl {
            map.insert(META_TTL_HEADER, ttl.parse().expect("header value"));
        }
        if let Some(modified) = modified {
            map.insert(LAST_MODIFIED, fmt(modified).parse().expect("header value"));
        }
        if let Some(now) = now {
            map.insert(DATE, fmt(now).parse().expect("header value"));
        }
        map
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().expect("timestamp")
    }

    #[test]
    fn expired_when_modified_plus_ttl_is_before_date() {
        assert!(expired(&headers(Some("5"), Some(t(0)), Some(t(6)))));
    }

    #[test]
    fn live_when_within_ttl() {
        assert!(!expired(&headers(Some("5"), Some(t(0)), Some(t(5)))));
        assert!(!expired(&headers(Some("5"), Some(t(0)), Some(t(3)))));
    }

    #[test]
    fn missing_ttl_means_live() {
        assert!(!expired(&headers(None, Some(t(0)), Some(t(100)))));
    }

    #[test]
    fn zero_or_negative_ttl_means_live() {
        assert!(!expired(&headers(Some("0"), Some(t(0)), Some(t(100)))));
        assert!(!expired(&headers(Some("-3"), Some(t(0)), Some(t(100)))));
    }

    #[test]
    fn unparseable_ttl_means_live() {
        assert!(!expired(&headers(Some("forever"), Some(t(0)), Some(t(100)))));
    }

    #[test]
    fn missing_timestamps_mean_live() {
        assert!(!expired(&headers(Some("5"), None, Some(t(100)))));
        assert!(!expired(&headers(Some("5"), Some(t(0)), None)));
    }

    #[test]
    fn numeric_zone_dates_parse() {
        let mut map = headers(Some("5"), None, None);
        map.insert(LAST_MODIFIED, t(0).to_rfc2822().parse().expect("header value"));
        map.insert(DATE, t(6).to_rfc2822().parse().expect("header value"));
        assert!(expired(&map));
    }
}
