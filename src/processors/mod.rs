//! Concrete processor implementations: identical lifecycle shape, each
//! with different math, grounded one-for-one in the original's
//! `src/processors/*.cpp`.

pub mod digital_output;
pub mod dispatcher;
pub mod event_sink;
pub mod mua_estimator;
pub mod reader;
pub mod running_stats;
pub mod spike_detector;

/// Helper shared by every concrete processor: parse a YAML mapping option
/// with a default, matching the original's `node["x"].as<T>(default)`
/// idiom without pulling in a YAML-schema crate.
pub(crate) fn yaml_get<T: serde::de::DeserializeOwned>(
    options: &serde_yaml::Value,
    key: &str,
    default: T,
) -> T {
    options
        .get(key)
        .and_then(|v| serde_yaml::from_value(v.clone()).ok())
        .unwrap_or(default)
}

/// Like [`yaml_get`] but returns `None` when the key is absent instead of
/// falling back to a default, for options with no sensible default.
pub(crate) fn yaml_get_opt<T: serde::de::DeserializeOwned>(options: &serde_yaml::Value, key: &str) -> Option<T> {
    options.get(key).and_then(|v| serde_yaml::from_value(v.clone()).ok())
}
