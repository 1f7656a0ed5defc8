use std::path::PathBuf;

const WORKSPACE_ENV: &str = "HAFALAND_WORKSPACE";
const LOG_ENV: &str = "HAFALAND_LOG";
const DEFAULT_LOG_FILTER: &str = "info";

/// Process-level settings. Workspace-level settings live in the database
/// (see the `setup.*` methods).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub workspace: Option<PathBuf>,
    pub log_filter: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let workspace = lookup(WORKSPACE_ENV)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        let log_filter = lookup(LOG_ENV)
            .or_else(|| lookup("RUST_LOG"))
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
        Config {
            workspace,
            log_filter,
        }
    }
}

/// Logs go to stderr; stdout is reserved for IPC responses.
pub fn init_log(filter: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_new(filter)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn cfg(vars: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_without_env() {
        let c = cfg(&[]);
        assert_eq!(c.workspace, None);
        assert_eq!(c.log_filter, "info");
    }

    #[test]
    fn own_log_var_wins_over_rust_log() {
        let c = cfg(&[("HAFALAND_LOG", "debug"), ("RUST_LOG", "warn")]);
        assert_eq!(c.log_filter, "debug");
        let c = cfg(&[("RUST_LOG", "warn")]);
        assert_eq!(c.log_filter, "warn");
    }

    #[test]
    fn blank_workspace_is_ignored() {
        assert_eq!(cfg(&[("HAFALAND_WORKSPACE", "  ")]).workspace, None);
        assert_eq!(
            cfg(&[("HAFALAND_WORKSPACE", "/tmp/ws")]).workspace,
            Some(PathBuf::from("/tmp/ws"))
        );
    }
}
