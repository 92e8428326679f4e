// src/utils/env.rs
use log::{info, warn};
use std::path::Path;

const ENV_PATHS: [&str; 3] = [".env", ".env.local", "../.env"];

/// Loads the first `.env` file found. Variables already present in the
/// process environment are never overwritten.
pub fn load_env() {
    for path in ENV_PATHS.iter() {
        if Path::new(path).exists() {
            match dotenv::from_path(path) {
                Ok(()) => {
                    info!("Loaded environment variables from {}", path);
                    return;
                }
                Err(e) => warn!("Failed to load environment from {}: {}", path, e),
            }
        }
    }
    info!("No .env file found, using environment variables from system");
}

/// Reads and parses an environment variable, falling back to `default` when
/// it is unset or unparsable.
pub fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                warn!("Ignoring unparsable value {:?} for {}", raw, key);
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_env_or_falls_back() {
        env::remove_var("LINKING_TEST_ENV_OR");
        assert_eq!(env_or("LINKING_TEST_ENV_OR", 7usize), 7);

        env::set_var("LINKING_TEST_ENV_OR", " 12 ");
        assert_eq!(env_or("LINKING_TEST_ENV_OR", 7usize), 12);

        env::set_var("LINKING_TEST_ENV_OR", "twelve");
        assert_eq!(env_or("LINKING_TEST_ENV_OR", 7usize), 7);

        env::remove_var("LINKING_TEST_ENV_OR");
    }
}
