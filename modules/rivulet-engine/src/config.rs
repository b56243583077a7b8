use std::env;
use std::fmt::Display;
use std::str::FromStr;

use rivulet_core::DEFAULT_MAX_CASCADE_DEPTH;
use tracing::warn;
use typed_builder::TypedBuilder;

pub const DEFAULT_EXECUTOR_PREFIX: &str = "store";

/// Engine tuning shared by every executor of an application.
#[derive(Debug, Clone, TypedBuilder)]
pub struct EngineConfig {
    /// Processing hops one published batch may trigger (internal cascades
    /// plus bus forwards) before it is rejected.
    #[builder(default = DEFAULT_MAX_CASCADE_DEPTH)]
    pub max_cascade_depth: usize,
    /// Executors registered lazily are named `{prefix}_{n}`.
    #[builder(default = DEFAULT_EXECUTOR_PREFIX.to_string(), setter(into))]
    pub executor_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl EngineConfig {
    /// Read overrides from `RIVULET_*` environment variables.
    pub fn from_env() -> Self {
        Self {
            max_cascade_depth: env_or("RIVULET_MAX_CASCADE_DEPTH", DEFAULT_MAX_CASCADE_DEPTH),
            executor_prefix: env::var("RIVULET_EXECUTOR_PREFIX")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_EXECUTOR_PREFIX.to_string()),
        }
    }
}

fn env_or<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|e| {
            warn!(key, value = %raw, error = %e, fallback = %default, "Invalid setting, using default");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let config = EngineConfig::builder().max_cascade_depth(8).build();
        assert_eq!(config.max_cascade_depth, 8);
        assert_eq!(config.executor_prefix, "store");
    }

    // Only test touching these variables; keep it that way.
    #[test]
    fn env_overrides_and_fallbacks() {
        env::set_var("RIVULET_MAX_CASCADE_DEPTH", "42");
        env::set_var("RIVULET_EXECUTOR_PREFIX", "shard");
        let config = EngineConfig::from_env();
        assert_eq!(config.max_cascade_depth, 42);
        assert_eq!(config.executor_prefix, "shard");

        env::set_var("RIVULET_MAX_CASCADE_DEPTH", "lots");
        env::remove_var("RIVULET_EXECUTOR_PREFIX");
        let config = EngineConfig::from_env();
        assert_eq!(config.max_cascade_depth, DEFAULT_MAX_CASCADE_DEPTH);
        assert_eq!(config.executor_prefix, DEFAULT_EXECUTOR_PREFIX);

        env::remove_var("RIVULET_MAX_CASCADE_DEPTH");
    }
}
