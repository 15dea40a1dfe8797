use std::{env, str::FromStr};

/// Reads a variable, treating blank values as unset.
pub fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn env_or(key: &str, default: &str) -> String {
    env_string(key).unwrap_or_else(|| default.to_string())
}

pub fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|value| value.parse::<T>().ok())
}

/// Base URLs are stored without a trailing slash so paths can be appended with `format!`.
pub fn base_url(key: &str, default: &str) -> String {
    env_or(key, default).trim_end_matches('/').to_string()
}
