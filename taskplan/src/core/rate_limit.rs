//! Throttling detection and retry delay computation.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

/// Delay used when a throttling error does not say how long to wait.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(60);

static RATE_LIMIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b429\b|quota|rate[ _-]?limit|too many requests|resource[ _-]?exhausted",
    )
    .expect("rate limit regex should be valid")
});

static RETRY_DELAY_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)retry in ([\d.]+)\s*s",
        r"(?is)retry_delay.*?seconds:\s*([\d.]+)",
        r"(?i)retry-after:\s*([\d.]+)",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("retry delay regex should be valid"))
    .collect()
});

/// True when error text carries a throttling or quota marker.
pub fn is_rate_limited(message: &str) -> bool {
    RATE_LIMIT_RE.is_match(message)
}

/// Extract the server-suggested wait from error text, if any.
///
/// Values too large for a [`Duration`] are ignored.
pub fn parse_retry_delay(message: &str) -> Option<Duration> {
    RETRY_DELAY_RES.iter().find_map(|re| {
        re.captures(message)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    })
}

/// Exponential back-off: `base * 2^attempt`, capped at `max`.
pub fn backoff_delay(base: Duration, attempt: u32, max: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt);
    base.saturating_mul(factor).min(max)
}

/// User-facing hint for a throttled task.
pub fn rate_limit_hint(retry_after: Option<Duration>) -> String {
    match retry_after {
        Some(delay) => format!(
            "the generation service is rate limited; retry in about {}s",
            delay.as_secs().max(1)
        ),
        None => "the generation service is rate limited; wait a minute and retry".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_common_throttling_markers() {
        assert!(is_rate_limited("HTTP 429: slow down"));
        assert!(is_rate_limited("Quota exceeded for metric"));
        assert!(is_rate_limited("RESOURCE_EXHAUSTED"));
        assert!(is_rate_limited("rate limit reached"));
    }

    #[test]
    fn ordinary_errors_are_not_rate_limits() {
        assert!(!is_rate_limited("failed to generate file content"));
        assert!(!is_rate_limited("connection reset by peer"));
        assert!(!is_rate_limited("port 14290 in use"));
    }

    #[test]
    fn parses_retry_delay_variants() {
        assert_eq!(
            parse_retry_delay("Please retry in 54.5s."),
            Some(Duration::from_secs_f64(54.5))
        );
        assert_eq!(
            parse_retry_delay("retry_delay {\n  seconds: 12\n}"),
            Some(Duration::from_secs(12))
        );
        assert_eq!(parse_retry_delay("quota exceeded"), None);
    }

    #[test]
    fn oversized_retry_delay_is_ignored() {
        let message = "429 quota exceeded, retry in 99999999999999999999999s";
        assert!(is_rate_limited(message));
        assert_eq!(parse_retry_delay(message), None);
        let digits = "9".repeat(400);
        assert_eq!(
            parse_retry_delay(&format!("retry_delay {{ seconds: {digits} }}")),
            None
        );
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(5);
        assert_eq!(backoff_delay(base, 0, max), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, 2, max), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, 3, max), Duration::from_secs(5));
        assert_eq!(backoff_delay(base, 40, max), Duration::from_secs(5));
    }
}
