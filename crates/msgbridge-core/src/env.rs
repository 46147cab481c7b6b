//! Environment variable helpers
//!
//! Configuration structs read their `MSGB_*` overrides through these.
//! A variable that is unset or fails to parse yields the default.

use std::str::FromStr;
use std::time::Duration;

/// Parse `key` as `T`, or return `default`.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Parse `key` as `T`; `None` when unset or unparsable.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Boolean variable. "1", "true", "yes", "on" (any case) are true; any
/// other set value is false; unset yields `default`.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Millisecond count as a `Duration`.
#[inline]
pub fn env_get_ms(key: &str, default: Duration) -> Duration {
    env_get_opt::<u64>(key)
        .map(Duration::from_millis)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_get_default() {
        let val: usize = env_get("__MSGB_TEST_UNSET__", 42);
        assert_eq!(val, 42);
        assert!(env_get_opt::<u32>("__MSGB_TEST_UNSET__").is_none());
    }

    #[test]
    fn test_env_get_parses() {
        std::env::set_var("__MSGB_TEST_NUM__", " 123 ");
        let val: usize = env_get("__MSGB_TEST_NUM__", 0);
        assert_eq!(val, 123);
        std::env::remove_var("__MSGB_TEST_NUM__");
    }

    #[test]
    fn test_env_get_invalid_parse() {
        std::env::set_var("__MSGB_TEST_BAD__", "many");
        let val: usize = env_get("__MSGB_TEST_BAD__", 7);
        assert_eq!(val, 7);
        std::env::remove_var("__MSGB_TEST_BAD__");
    }

    #[test]
    fn test_env_get_bool_variants() {
        std::env::set_var("__MSGB_TEST_BOOL__", "On");
        assert!(env_get_bool("__MSGB_TEST_BOOL__", false));
        std::env::set_var("__MSGB_TEST_BOOL__", "0");
        assert!(!env_get_bool("__MSGB_TEST_BOOL__", true));
        std::env::remove_var("__MSGB_TEST_BOOL__");
        assert!(env_get_bool("__MSGB_TEST_BOOL__", true));
    }

    #[test]
    fn test_env_get_ms() {
        std::env::set_var("__MSGB_TEST_MS__", "250");
        assert_eq!(
            env_get_ms("__MSGB_TEST_MS__", Duration::ZERO),
            Duration::from_millis(250)
        );
        std::env::remove_var("__MSGB_TEST_MS__");
    }
}
