//! Standard paths used by duo-gate tools

use std::path::PathBuf;

/// Environment variable that overrides the configuration file location
pub const CONFIG_ENV: &str = "DUO_CONFIG";

/// Standard duo-gate paths
pub struct Paths {
    /// Config directory (/etc/duo)
    pub config_dir: PathBuf,
    /// Configuration file (/etc/duo/login_duo.conf unless overridden)
    pub config_file: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

impl Paths {
    pub fn new() -> Self {
        let config_dir = PathBuf::from("/etc/duo");

        let config_file = std::env::var_os(CONFIG_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| config_dir.join("login_duo.conf"));

        Self {
            config_dir,
            config_file,
        }
    }

    /// Resolve the config file, preferring an explicit path
    pub fn config_file_or(&self, explicit: Option<PathBuf>) -> PathBuf {
        explicit.unwrap_or_else(|| self.config_file.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_config_wins() {
        let paths = Paths::new();
        let explicit = PathBuf::from("/tmp/custom.conf");
        assert_eq!(paths.config_file_or(Some(explicit.clone())), explicit);
        assert_eq!(paths.config_file_or(None), paths.config_file);
    }
}
