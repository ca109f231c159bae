use std::env;
use std::str::FromStr;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Reads an environment variable and parses it, falling back to `default` when
/// the variable is unset or unparsable.
///
/// An unparsable value is reported with a warning rather than an error so a
/// typo in one knob cannot keep the whole service from starting.
pub fn env_or<T: FromStr + Copy>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!("invalid value for {}: {:?}, using default", name, raw);
                default
            }
        },
        Err(_) => default,
    }
}

/// Reads an optional string environment variable, treating an empty value as unset.
pub fn env_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}
