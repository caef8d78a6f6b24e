use std::{env, str::FromStr};

/// Parse a boolean flag from a string value, or return the given default value otherwise.
pub fn parse_boolean_flag(value: Option<String>, default: bool) -> bool {
    let value = match value {
        Some(v) => v,
        None => return default,
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

/// Reads the environment variable `key` and parses it as a `T`.
///
/// Returns `Ok(None)` if the variable is not set, and `Err` with the raw value if it is set but cannot be parsed.
pub fn env_var_parsed<T: FromStr>(key: &str) -> Result<Option<T>, String> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| raw),
        Err(_) => Ok(None),
    }
}
