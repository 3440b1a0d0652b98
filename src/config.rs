use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_INVITE_BASE_URL: &str = "http://localhost:3000";
pub const DEFAULT_LOG_FILTER: &str = "info";
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Process settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Workspace opened before the first request, if any.
    pub workspace: Option<PathBuf>,
    /// Prefix of the shareable `<base>/join/<code>` link.
    pub invite_base_url: String,
    pub log_filter: String,
    pub busy_timeout: Duration,
    /// User ids promoted to ADMIN whenever they authenticate.
    pub admin_users: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            invite_base_url: DEFAULT_INVITE_BASE_URL.to_string(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
            admin_users: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let busy_ms = non_empty("CLASSROOMD_BUSY_TIMEOUT_MS")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_BUSY_TIMEOUT_MS);
        Self {
            workspace: non_empty("CLASSROOMD_WORKSPACE").map(PathBuf::from),
            invite_base_url: non_empty("CLASSROOMD_INVITE_BASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_INVITE_BASE_URL.to_string()),
            log_filter: non_empty("CLASSROOMD_LOG").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            busy_timeout: Duration::from_millis(busy_ms),
            admin_users: non_empty("CLASSROOMD_ADMIN_USERS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|id| !id.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn missing_variables_fall_back_to_defaults() {
        let cfg = Config::from_lookup(|_| None);
        assert!(cfg.workspace.is_none());
        assert_eq!(cfg.invite_base_url, DEFAULT_INVITE_BASE_URL);
        assert_eq!(cfg.log_filter, "info");
        assert_eq!(cfg.busy_timeout, Duration::from_millis(5000));
        assert!(cfg.admin_users.is_empty());
    }

    #[test]
    fn variables_override_defaults() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("CLASSROOMD_WORKSPACE", "/srv/classroom"),
            ("CLASSROOMD_INVITE_BASE_URL", "https://class.example.edu/"),
            ("CLASSROOMD_LOG", "classroomd=debug"),
            ("CLASSROOMD_BUSY_TIMEOUT_MS", "not-a-number"),
            ("CLASSROOMD_ADMIN_USERS", "ops-1, ,ops-2"),
        ]);
        let cfg = Config::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.workspace, Some(PathBuf::from("/srv/classroom")));
        assert_eq!(cfg.invite_base_url, "https://class.example.edu");
        assert_eq!(cfg.log_filter, "classroomd=debug");
        assert_eq!(cfg.busy_timeout, Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS));
        assert_eq!(cfg.admin_users, vec!["ops-1".to_string(), "ops-2".to_string()]);
    }
}
