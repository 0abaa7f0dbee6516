//! Translation of HTTP failures into [`PipelineError`]s, including the
//! wait hint for rate-limited responses.

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;

use blogpilot_types::PipelineError;

/// Wait applied to a 429 that carries no usable hint.
pub const DEFAULT_RATE_LIMIT_WAIT_MS: u64 = 15_000;

/// Reset header values above this are absolute epoch seconds, below it are
/// seconds-until-reset.
const EPOCH_THRESHOLD_SECS: f64 = 1_000_000_000.0;

const RESET_HEADERS: [&str; 3] = ["x-ratelimit-reset", "ratelimit-reset", "x-ratelimit-reset-requests"];

pub fn map_http_error(
    provider: &str,
    status: reqwest::StatusCode,
    headers: &HeaderMap,
    body: &str,
) -> PipelineError {
    let status_u16 = status.as_u16();
    let retry_after_ms = if status_u16 == 429 {
        Some(rate_limit_wait_ms(headers, Utc::now()).unwrap_or(DEFAULT_RATE_LIMIT_WAIT_MS))
    } else {
        None
    };
    PipelineError::Http {
        provider: provider.to_string(),
        status: status_u16,
        message: extract_error_message(body),
        retry_after_ms,
    }
}

/// Derive a wait hint from `retry-after` (seconds or HTTP-date), then from a
/// rate-limit-reset header.
pub fn rate_limit_wait_ms(headers: &HeaderMap, now: DateTime<Utc>) -> Option<u64> {
    if let Some(value) = header_str(headers, "retry-after") {
        if let Some(ms) = parse_retry_after(value, now) {
            return Some(ms);
        }
    }
    RESET_HEADERS
        .iter()
        .filter_map(|name| header_str(headers, name))
        .find_map(|value| parse_reset(value, now))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<u64> {
    if let Ok(secs) = value.parse::<f64>() {
        return (secs >= 0.0).then(|| (secs * 1000.0).round() as u64);
    }
    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = date.with_timezone(&Utc) - now;
    Some(delta.num_milliseconds().max(0) as u64)
}

fn parse_reset(value: &str, now: DateTime<Utc>) -> Option<u64> {
    // Some providers append a unit, e.g. "12s".
    let numeric = value.trim_end_matches('s').parse::<f64>().ok()?;
    if numeric < 0.0 {
        return None;
    }
    if numeric > EPOCH_THRESHOLD_SECS {
        let now_secs = now.timestamp_millis() as f64 / 1000.0;
        Some(((numeric - now_secs).max(0.0) * 1000.0).round() as u64)
    } else {
        Some((numeric * 1000.0).round() as u64)
    }
}

pub fn extract_error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    let message = parsed.as_ref().and_then(|v| {
        v["error"]["message"]
            .as_str()
            .or_else(|| v["error"].as_str())
            .or_else(|| v["message"].as_str())
            .map(String::from)
    });
    message.unwrap_or_else(|| body.trim().to_string())
}

/// Map a transport failure (connect, read, decode) to the provider taxonomy.
pub fn send_error(provider: &str, err: reqwest::Error) -> PipelineError {
    if err.is_timeout() {
        return PipelineError::Timeout {
            provider: provider.to_string(),
            timeout_ms: 0,
        };
    }
    PipelineError::Transport {
        provider: provider.to_string(),
        message: err.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use reqwest::header::HeaderValue;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap()
    }

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_str(v).unwrap());
        }
        map
    }

    #[test]
    fn retry_after_seconds() {
        let h = headers(&[("retry-after", "7")]);
        assert_eq!(rate_limit_wait_ms(&h, now()), Some(7_000));
    }

    #[test]
    fn retry_after_http_date() {
        let h = headers(&[("retry-after", "Wed, 21 Oct 2015 07:28:30 GMT")]);
        assert_eq!(rate_limit_wait_ms(&h, now()), Some(30_000));
    }

    #[test]
    fn retry_after_date_in_past_is_zero() {
        let h = headers(&[("retry-after", "Wed, 21 Oct 2015 07:00:00 GMT")]);
        assert_eq!(rate_limit_wait_ms(&h, now()), Some(0));
    }

    #[test]
    fn reset_header_relative_seconds() {
        let h = headers(&[("x-ratelimit-reset", "20")]);
        assert_eq!(rate_limit_wait_ms(&h, now()), Some(20_000));
    }

    #[test]
    fn reset_header_absolute_epoch() {
        let epoch = now().timestamp() + 12;
        let h = headers(&[("x-ratelimit-reset", &epoch.to_string())]);
        assert_eq!(rate_limit_wait_ms(&h, now()), Some(12_000));
    }

    #[test]
    fn retry_after_takes_priority_over_reset() {
        let h = headers(&[("retry-after", "3"), ("x-ratelimit-reset", "40")]);
        assert_eq!(rate_limit_wait_ms(&h, now()), Some(3_000));
    }

    #[test]
    fn unparseable_retry_after_falls_through_to_reset() {
        let h = headers(&[("retry-after", "soon"), ("ratelimit-reset", "5")]);
        assert_eq!(rate_limit_wait_ms(&h, now()), Some(5_000));
    }

    #[test]
    fn error_mapping_429_without_hint_uses_default() {
        let err = map_http_error(
            "openai",
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            &HeaderMap::new(),
            r#"{"error": {"message": "Rate limit reached"}}"#,
        );
        match err {
            PipelineError::Http {
                status,
                retry_after_ms,
                message,
                ..
            } => {
                assert_eq!(status, 429);
                assert_eq!(retry_after_ms, Some(DEFAULT_RATE_LIMIT_WAIT_MS));
                assert_eq!(message, "Rate limit reached");
            }
            other => panic!("expected Http, got {other:?}"),
        }
    }

    #[test]
    fn error_mapping_non_429_has_no_hint() {
        let err = map_http_error(
            "gemini",
            reqwest::StatusCode::FORBIDDEN,
            &headers(&[("retry-after", "5")]),
            "plain failure",
        );
        assert!(matches!(
            err,
            PipelineError::Http { status: 403, retry_after_ms: None, ref message, .. } if message == "plain failure"
        ));
    }

    #[test]
    fn extract_error_message_shapes() {
        assert_eq!(extract_error_message(r#"{"error":"quota"}"#), "quota");
        assert_eq!(extract_error_message(r#"{"message":"bad"}"#), "bad");
        assert_eq!(extract_error_message("  oops "), "oops");
    }
}
