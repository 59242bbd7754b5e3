//! Daemon configuration.

use crate::alloc::DEFAULT_MAX_STUDENTS;
use anyhow::Context;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Workspace opened at startup, before any `workspace.select`.
    pub workspace: Option<PathBuf>,

    /// Inputs with more students than this are rejected.
    pub max_students: usize,

    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_filter: String,

    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            max_students: DEFAULT_MAX_STUDENTS,
            log_filter: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let workspace = get("HALLSEATD_WORKSPACE")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let max_students = match get("HALLSEATD_MAX_STUDENTS") {
            Some(v) => v
                .trim()
                .parse::<usize>()
                .with_context(|| format!("HALLSEATD_MAX_STUDENTS must be a positive integer, got {v:?}"))?,
            None => defaults.max_students,
        };
        if max_students == 0 {
            anyhow::bail!("HALLSEATD_MAX_STUDENTS must be greater than zero");
        }

        let log_filter = get("HALLSEATD_LOG").unwrap_or(defaults.log_filter);

        let log_format = match get("HALLSEATD_LOG_FORMAT").as_deref().map(str::trim) {
            None | Some("") | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => anyhow::bail!("HALLSEATD_LOG_FORMAT must be text or json, got {other:?}"),
        };

        Ok(Self {
            workspace,
            max_students,
            log_filter,
            log_format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = Config::from_lookup(lookup(&[])).expect("config");
        assert!(cfg.workspace.is_none());
        assert_eq!(cfg.max_students, DEFAULT_MAX_STUDENTS);
        assert_eq!(cfg.log_filter, "info");
        assert_eq!(cfg.log_format, LogFormat::Text);
    }

    #[test]
    fn reads_overrides() {
        let cfg = Config::from_lookup(lookup(&[
            ("HALLSEATD_WORKSPACE", "/tmp/ws"),
            ("HALLSEATD_MAX_STUDENTS", "500"),
            ("HALLSEATD_LOG", "debug"),
            ("HALLSEATD_LOG_FORMAT", "json"),
        ]))
        .expect("config");
        assert_eq!(cfg.workspace, Some(PathBuf::from("/tmp/ws")));
        assert_eq!(cfg.max_students, 500);
        assert_eq!(cfg.log_filter, "debug");
        assert_eq!(cfg.log_format, LogFormat::Json);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(Config::from_lookup(lookup(&[("HALLSEATD_MAX_STUDENTS", "lots")])).is_err());
        assert!(Config::from_lookup(lookup(&[("HALLSEATD_MAX_STUDENTS", "0")])).is_err());
        assert!(Config::from_lookup(lookup(&[("HALLSEATD_LOG_FORMAT", "xml")])).is_err());
    }
}
