//! Freshness computation for stored responses.
//!
//! Every entry written to the persistent store carries exactly one
//! [`FreshnessDirective`], computed once at store time from the origin's
//! headers (or overridden in force-cache mode). Lookups only compare that
//! directive against the clock; nothing is recomputed retroactively.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::key::CacheKey;
use crate::resource::BinaryResource;

/// Default time-to-live for cached assets (6 hours).
pub const DEFAULT_TTL: Duration = Duration::from_secs(6 * 60 * 60);

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Rule deciding how long a stored entry may be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FreshnessDirective {
    /// Absolute expiry instant.
    ExplicitExpiry(DateTime<Utc>),
    /// Seconds after the stored date.
    MaxAge(u64),
}

/// A persisted response as read back from the store.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub key: CacheKey,
    pub payload: BinaryResource,
    pub stored_at: DateTime<Utc>,
    /// `None` only for rows that were written without a directive; such
    /// entries are always stale.
    pub directive: Option<FreshnessDirective>,
}

/// Caching-relevant headers of an origin response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OriginHeaders {
    pub cache_control: Option<String>,
    pub expires: Option<String>,
}

/// Whether `entry` may still be served at `now`.
///
/// Fresh iff `now <= stored_at + ttl`; the boundary itself is fresh.
pub fn is_fresh(entry: &StoredEntry, now: DateTime<Utc>) -> bool {
    match entry.directive {
        Some(FreshnessDirective::ExplicitExpiry(expires_at)) => now <= expires_at,
        Some(FreshnessDirective::MaxAge(secs)) => {
            let limit = i64::try_from(secs)
                .ok()
                .and_then(TimeDelta::try_seconds)
                .and_then(|ttl| entry.stored_at.checked_add_signed(ttl));
            // an unrepresentable limit lies beyond any reachable clock
            limit.is_none_or(|limit| now <= limit)
        }
        None => now <= entry.stored_at,
    }
}

/// Store-time policy: default TTL plus the force-cache override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    pub default_ttl: Duration,
    pub force_cache: bool,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self { default_ttl: DEFAULT_TTL, force_cache: false }
    }
}

impl FreshnessPolicy {
    pub fn new(default_ttl: Duration) -> Self {
        Self { default_ttl, force_cache: false }
    }

    /// Compute the directive persisted alongside a freshly fetched response.
    ///
    /// Precedence: force-cache, then origin `max-age`, then `no-store` or
    /// `no-cache` (immediately stale), then origin `Expires` (converted to a
    /// max-age relative to `now`), then the default TTL. Other
    /// `Cache-Control` directives such as `public` do not decide freshness.
    pub fn directive_for(&self, origin: &OriginHeaders, now: DateTime<Utc>) -> FreshnessDirective {
        let default = FreshnessDirective::MaxAge(self.default_ttl.as_secs());

        if self.force_cache {
            return default;
        }

        if let Some(cache_control) = origin.cache_control.as_deref() {
            if let Some(secs) = parse_max_age(cache_control) {
                return FreshnessDirective::MaxAge(secs);
            }
            if forbids_reuse(cache_control) {
                return FreshnessDirective::MaxAge(0);
            }
        }

        if let Some(expires) = origin.expires.as_deref() {
            let remaining = parse_http_date(expires)
                .map(|at| (at - now).num_seconds().max(0) as u64)
                .unwrap_or(0);
            return FreshnessDirective::MaxAge(remaining);
        }

        default
    }
}

/// Headers persisted with a stored entry.
///
/// Always contains `Content-Type`, `Content-Length` and `Date`, plus either
/// `Expires` or a synthesized `Cache-Control: public, max-age=<n>`.
pub fn stored_headers(
    payload: &BinaryResource, directive: FreshnessDirective, now: DateTime<Utc>,
) -> Vec<(String, String)> {
    let mut headers = vec![
        (
            "Content-Type".to_string(),
            payload.content_type().unwrap_or("application/octet-stream").to_string(),
        ),
        ("Content-Length".to_string(), payload.len().to_string()),
        ("Date".to_string(), format_http_date(now)),
    ];

    match directive {
        FreshnessDirective::ExplicitExpiry(at) => headers.push(("Expires".to_string(), format_http_date(at))),
        FreshnessDirective::MaxAge(secs) => {
            headers.push(("Cache-Control".to_string(), format!("public, max-age={secs}")))
        }
    }

    headers
}

/// Extract `max-age=N` from a `Cache-Control` value.
pub fn parse_max_age(cache_control: &str) -> Option<u64> {
    cache_control.split(',').find_map(|directive| {
        let (name, value) = directive.trim().split_once('=')?;
        if name.trim().eq_ignore_ascii_case("max-age") {
            value.trim().trim_matches('"').parse().ok()
        } else {
            None
        }
    })
}

fn forbids_reuse(cache_control: &str) -> bool {
    cache_control
        .split(',')
        .map(|directive| directive.split('=').next().unwrap_or_default().trim())
        .any(|name| name.eq_ignore_ascii_case("no-store") || name.eq_ignore_ascii_case("no-cache"))
}

/// Parse an IMF-fixdate (`Sun, 06 Nov 1994 08:49:37 GMT`).
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn format_http_date(at: DateTime<Utc>) -> String {
    at.format(HTTP_DATE_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(stored_at: DateTime<Utc>, directive: Option<FreshnessDirective>) -> StoredEntry {
        StoredEntry {
            key: CacheKey::parse("https://example.com/a.png").unwrap(),
            payload: BinaryResource::new(vec![1, 2, 3], Some("image/png".into())),
            stored_at,
            directive,
        }
    }

    #[test]
    fn test_max_age_boundary_is_fresh() {
        let stored_at = Utc::now();
        let e = entry(stored_at, Some(FreshnessDirective::MaxAge(60)));
        assert!(is_fresh(&e, stored_at));
        assert!(is_fresh(&e, stored_at + TimeDelta::seconds(60)));
        assert!(!is_fresh(&e, stored_at + TimeDelta::seconds(60) + TimeDelta::milliseconds(1)));
    }

    #[test]
    fn test_explicit_expiry_boundary() {
        let stored_at = Utc::now();
        let expires_at = stored_at + TimeDelta::seconds(30);
        let e = entry(stored_at, Some(FreshnessDirective::ExplicitExpiry(expires_at)));
        assert!(is_fresh(&e, expires_at));
        assert!(!is_fresh(&e, expires_at + TimeDelta::seconds(1)));
    }

    #[test]
    fn test_missing_directive_is_expired() {
        let stored_at = Utc::now();
        let e = entry(stored_at, None);
        assert!(!is_fresh(&e, stored_at + TimeDelta::seconds(1)));
    }

    #[test]
    fn test_directive_default_ttl_without_origin_headers() {
        let policy = FreshnessPolicy::new(Duration::from_millis(90_500));
        let directive = policy.directive_for(&OriginHeaders::default(), Utc::now());
        assert_eq!(directive, FreshnessDirective::MaxAge(90));
    }

    #[test]
    fn test_directive_honors_origin_max_age() {
        let policy = FreshnessPolicy::default();
        let origin = OriginHeaders { cache_control: Some("public, max-age=120".into()), expires: None };
        assert_eq!(policy.directive_for(&origin, Utc::now()), FreshnessDirective::MaxAge(120));
    }

    #[test]
    fn test_directive_no_store_is_immediately_stale() {
        let policy = FreshnessPolicy::default();
        let origin = OriginHeaders { cache_control: Some("no-store".into()), expires: None };
        assert_eq!(policy.directive_for(&origin, Utc::now()), FreshnessDirective::MaxAge(0));
    }

    #[test]
    fn test_directive_no_cache_is_immediately_stale() {
        let origin = OriginHeaders { cache_control: Some("private, No-Cache".into()), expires: None };
        assert_eq!(FreshnessPolicy::default().directive_for(&origin, Utc::now()), FreshnessDirective::MaxAge(0));
    }

    #[test]
    fn test_directive_public_falls_through_to_expires() {
        let now = Utc::now();
        let origin = OriginHeaders {
            cache_control: Some("public".into()),
            expires: Some(format_http_date(now + TimeDelta::seconds(600))),
        };
        let FreshnessDirective::MaxAge(secs) = FreshnessPolicy::default().directive_for(&origin, now) else {
            panic!("expected max-age");
        };
        assert!((599..=600).contains(&secs));
    }

    #[test]
    fn test_directive_bare_public_uses_default_ttl() {
        let policy = FreshnessPolicy::new(Duration::from_secs(900));
        for value in ["public", "public, immutable"] {
            let origin = OriginHeaders { cache_control: Some(value.into()), expires: None };
            assert_eq!(policy.directive_for(&origin, Utc::now()), FreshnessDirective::MaxAge(900));
        }
    }

    #[test]
    fn test_directive_max_age_wins_over_expires() {
        let origin = OriginHeaders {
            cache_control: Some("max-age=30".into()),
            expires: Some("Thu, 01 Jan 1970 00:00:00 GMT".into()),
        };
        assert_eq!(FreshnessPolicy::default().directive_for(&origin, Utc::now()), FreshnessDirective::MaxAge(30));
    }

    #[test]
    fn test_directive_force_cache_overrides_origin() {
        let policy = FreshnessPolicy { default_ttl: Duration::from_secs(3600), force_cache: true };
        let origin = OriginHeaders {
            cache_control: Some("no-store".into()),
            expires: Some("Thu, 01 Jan 1970 00:00:00 GMT".into()),
        };
        assert_eq!(policy.directive_for(&origin, Utc::now()), FreshnessDirective::MaxAge(3600));
    }

    #[test]
    fn test_directive_converts_expires_to_max_age() {
        let now = Utc::now();
        let expires = format_http_date(now + TimeDelta::seconds(600));
        let origin = OriginHeaders { cache_control: None, expires: Some(expires) };
        let FreshnessDirective::MaxAge(secs) = FreshnessPolicy::default().directive_for(&origin, now) else {
            panic!("expected max-age");
        };
        // formatting drops sub-second precision
        assert!((599..=600).contains(&secs));
    }

    #[test]
    fn test_directive_past_expires_clamps_to_zero() {
        let origin = OriginHeaders { cache_control: None, expires: Some("Thu, 01 Jan 1970 00:00:00 GMT".into()) };
        assert_eq!(FreshnessPolicy::default().directive_for(&origin, Utc::now()), FreshnessDirective::MaxAge(0));
    }

    #[test]
    fn test_parse_max_age_variants() {
        assert_eq!(parse_max_age("max-age=10"), Some(10));
        assert_eq!(parse_max_age("public, MAX-AGE=42, immutable"), Some(42));
        assert_eq!(parse_max_age("s-maxage=5, no-cache"), None);
        assert_eq!(parse_max_age("max-age=abc"), None);
    }

    #[test]
    fn test_http_date_round_trip() {
        let parsed = parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT").unwrap();
        assert_eq!(format_http_date(parsed), "Sun, 06 Nov 1994 08:49:37 GMT");
    }

    #[test]
    fn test_stored_headers_contents() {
        let payload = BinaryResource::new(vec![0u8; 5], Some("audio/mpeg".into()));
        let headers = stored_headers(&payload, FreshnessDirective::MaxAge(30), Utc::now());
        let get = |name: &str| headers.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str());
        assert_eq!(get("Content-Type"), Some("audio/mpeg"));
        assert_eq!(get("Content-Length"), Some("5"));
        assert_eq!(get("Cache-Control"), Some("public, max-age=30"));
        assert!(get("Date").is_some());
        assert!(get("Expires").is_none());
    }
}
