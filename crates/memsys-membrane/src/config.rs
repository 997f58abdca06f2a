//! Process-wide memory subsystem configuration.
//!
//! Read once at `initialize` time. Three knobs, all optional overrides via
//! environment variables when a caller wants process-wide defaults instead of
//! constructing [`Config`] by hand:
//!
//! - `MEMSYS_TEMPORARY_MEMORY` — bytes reserved for the linear arena (`0` disables it).
//! - `MEMSYS_CONTEXT_DEPTH` — max nested memory-context tags per thread.
//! - `MEMSYS_TRACKER_MAX` — tracker tag table capacity.

/// Host-provided configuration record, read at `initialize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Arena size in bytes. `0` disables the linear arena entirely.
    pub temporary_memory: usize,
    /// Max nested memory-context tags per thread.
    pub memory_context_depth: usize,
    /// Tracker tag table capacity.
    pub memory_tracker_max: usize,
}

impl Config {
    /// A reasonable default: 4 MiB arena, 32 nested contexts, 16K tracked tags.
    pub const DEFAULT: Self = Self {
        temporary_memory: 4 * 1024 * 1024,
        memory_context_depth: 32,
        memory_tracker_max: 16 * 1024,
    };

    /// Builds a [`Config`] from defaults, overridden by any of the
    /// `MEMSYS_*` environment variables that parse as a `usize`.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::DEFAULT;
        if let Some(v) = parse_env_usize("MEMSYS_TEMPORARY_MEMORY") {
            config.temporary_memory = v;
        }
        if let Some(v) = parse_env_usize("MEMSYS_CONTEXT_DEPTH") {
            config.memory_context_depth = v;
        }
        if let Some(v) = parse_env_usize("MEMSYS_TRACKER_MAX") {
            config.memory_tracker_max = v;
        }
        config
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::DEFAULT
    }
}

fn parse_env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_constant() {
        assert_eq!(Config::default(), Config::DEFAULT);
    }

    #[test]
    fn from_env_falls_back_to_defaults_when_unset() {
        // SAFETY: single-threaded test process env mutation, restored below.
        unsafe {
            std::env::remove_var("MEMSYS_TEMPORARY_MEMORY");
            std::env::remove_var("MEMSYS_CONTEXT_DEPTH");
            std::env::remove_var("MEMSYS_TRACKER_MAX");
        }
        assert_eq!(Config::from_env(), Config::DEFAULT);
    }

    #[test]
    fn from_env_honors_overrides() {
        // SAFETY: single-threaded test process env mutation, restored below.
        unsafe {
            std::env::set_var("MEMSYS_TEMPORARY_MEMORY", "65536");
            std::env::set_var("MEMSYS_CONTEXT_DEPTH", "8");
            std::env::set_var("MEMSYS_TRACKER_MAX", "4");
        }
        let config = Config::from_env();
        assert_eq!(config.temporary_memory, 65536);
        assert_eq!(config.memory_context_depth, 8);
        assert_eq!(config.memory_tracker_max, 4);
        // SAFETY: single-threaded test process env mutation.
        unsafe {
            std::env::remove_var("MEMSYS_TEMPORARY_MEMORY");
            std::env::remove_var("MEMSYS_CONTEXT_DEPTH");
            std::env::remove_var("MEMSYS_TRACKER_MAX");
        }
    }

    #[test]
    fn parse_env_usize_rejects_garbage() {
        // SAFETY: single-threaded test process env mutation, restored below.
        unsafe {
            std::env::set_var("MEMSYS_TRACKER_MAX", "not-a-number");
        }
        assert_eq!(parse_env_usize("MEMSYS_TRACKER_MAX"), None);
        // SAFETY: single-threaded test process env mutation.
        unsafe {
            std::env::remove_var("MEMSYS_TRACKER_MAX");
        }
    }
}
