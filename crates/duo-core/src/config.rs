//! Configuration for the login policy core
//!
//! The configuration file is a flat INI document:
//!
//! ```ini
//! [duo]
//! ikey = DIXXXXXXXXXXXXXXXXXX
//! skey = deadbeefdeadbeefdeadbeefdeadbeefdeadbeef
//! host = api-xxxxxxxx.duosecurity.com
//! groups = wheel duo-*
//! taexpire = 10
//! ```
//!
//! Options are applied one by one through [`ConfigBuilder::apply`]. A bad
//! option is logged and skipped; it never aborts loading.

use crate::log::{Logger, Priority};
use crate::options::{
    clamp_prompts, clamp_trust_expire, parse_boolean, parse_int, resolve_timeout, Timeout,
    MAX_GROUPS, MAX_PROMPTS,
};
use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Errors raised while applying a single option
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown option: {0}")]
    UnknownOption(String),

    #[error("Invalid failmode: '{0}'")]
    InvalidFailMode(String),

    #[error("Exceeded max {max} groups")]
    TooManyGroups { max: usize },

    #[error("Malformed line: {0}")]
    Syntax(String),
}

/// What to do when the verification service cannot give an answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    /// Let the login through
    #[default]
    Safe,
    /// Refuse the login
    Secure,
}

impl FailMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailMode::Safe => "safe",
            FailMode::Secure => "secure",
        }
    }
}

/// Resolved configuration. Built once, then only read.
#[derive(Clone, Serialize)]
pub struct DuoConfig {
    /// Integration key
    pub ikey: Option<String>,
    /// Secret key; never serialized or printed
    #[serde(skip)]
    pub skey: Option<String>,
    /// API hostname
    pub api_host: Option<String>,
    /// CA bundle for the API connection
    pub ca_file: Option<String>,
    /// Outbound HTTP proxy
    pub http_proxy: Option<String>,

    /// Group pattern entries; empty means everyone is subject to the policy
    pub groups: Vec<String>,

    pub fail_mode: FailMode,

    /// Maximum second-factor prompts
    pub prompts: u32,

    /// Remote request timeout
    pub timeout: Timeout,

    /// Trusted-origin window in minutes; 0 disables the cache
    pub trust_expire_minutes: u32,

    /// Directory for trust markers; empty means the user's home directory
    pub trust_prefix: String,

    pub push_info: bool,
    pub no_verify: bool,
    pub auto_push: bool,
    pub accept_env_factor: bool,
    pub local_ip_fallback: bool,
    pub send_gecos: bool,
}

impl Default for DuoConfig {
    fn default() -> Self {
        Self {
            ikey: None,
            skey: None,
            api_host: None,
            ca_file: None,
            http_proxy: None,
            groups: Vec::new(),
            fail_mode: FailMode::Safe,
            prompts: MAX_PROMPTS,
            timeout: Timeout::Unlimited,
            trust_expire_minutes: 0,
            trust_prefix: String::new(),
            push_info: false,
            no_verify: false,
            auto_push: false,
            accept_env_factor: false,
            local_ip_fallback: false,
            send_gecos: false,
        }
    }
}

impl fmt::Debug for DuoConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DuoConfig")
            .field("ikey", &self.ikey)
            .field("skey", &self.skey.as_ref().map(|_| "<redacted>"))
            .field("api_host", &self.api_host)
            .field("ca_file", &self.ca_file)
            .field("http_proxy", &self.http_proxy)
            .field("groups", &self.groups)
            .field("fail_mode", &self.fail_mode)
            .field("prompts", &self.prompts)
            .field("timeout", &self.timeout)
            .field("trust_expire_minutes", &self.trust_expire_minutes)
            .field("trust_prefix", &self.trust_prefix)
            .field("push_info", &self.push_info)
            .field("no_verify", &self.no_verify)
            .field("auto_push", &self.auto_push)
            .field("accept_env_factor", &self.accept_env_factor)
            .field("local_ip_fallback", &self.local_ip_fallback)
            .field("send_gecos", &self.send_gecos)
            .finish()
    }
}

impl DuoConfig {
    /// Load configuration from a file. Only I/O failure is an error; bad
    /// options are logged and skipped.
    pub fn load(path: &Path, logger: &Logger) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        Ok(Self::parse(&content, logger))
    }

    /// Parse INI text
    pub fn parse(content: &str, logger: &Logger) -> Self {
        let mut builder = ConfigBuilder::default();
        let mut section = String::new();

        for (idx, raw) in content.lines().enumerate() {
            let lineno = idx + 1;
            let line = strip_inline_comment(raw).trim();

            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            if let Some(rest) = line.strip_prefix('[') {
                match rest.strip_suffix(']') {
                    Some(name) => section = name.trim().to_string(),
                    None => report(logger, lineno, &ConfigError::Syntax(line.to_string())),
                }
                continue;
            }

            let Some((name, value)) = line.split_once(|c: char| c == '=' || c == ':') else {
                report(logger, lineno, &ConfigError::Syntax(line.to_string()));
                continue;
            };

            let (name, value) = (name.trim(), value.trim());
            tracing::debug!(section = %section, option = name, "applying config option");
            if let Err(e) = builder.apply(name, value) {
                report(logger, lineno, &e);
            }
        }

        builder.build()
    }
}

fn report(logger: &Logger, lineno: usize, err: &ConfigError) {
    let priority = match err {
        ConfigError::UnknownOption(_) => Priority::Warning,
        _ => Priority::Err,
    };
    logger.log(
        priority,
        &format!("Invalid configuration on line {}", lineno),
        None,
        None,
        Some(&err.to_string()),
    );
}

/// Strip a trailing ` ; comment`, the way INI readers do
fn strip_inline_comment(line: &str) -> &str {
    line.find(" ;")
        .or_else(|| line.find("\t;"))
        .map_or(line, |pos| &line[..pos])
}

/// Applies options one at a time and yields the finished configuration
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    cfg: DuoConfig,
}

impl ConfigBuilder {
    /// Apply a single `name = value` option
    pub fn apply(&mut self, name: &str, value: &str) -> Result<(), ConfigError> {
        let cfg = &mut self.cfg;
        match name {
            "ikey" => cfg.ikey = Some(value.to_string()),
            "skey" => cfg.skey = Some(value.to_string()),
            "host" => cfg.api_host = Some(value.to_string()),
            "cafile" => cfg.ca_file = Some(value.to_string()),
            "http_proxy" => cfg.http_proxy = Some(value.to_string()),
            "groups" | "group" => {
                for pattern in value.split(' ').filter(|p| !p.is_empty()) {
                    if cfg.groups.len() >= MAX_GROUPS {
                        cfg.groups.clear();
                        return Err(ConfigError::TooManyGroups { max: MAX_GROUPS });
                    }
                    cfg.groups.push(pattern.to_string());
                }
            }
            "failmode" => {
                cfg.fail_mode = match value {
                    "secure" => FailMode::Secure,
                    "safe" => FailMode::Safe,
                    other => return Err(ConfigError::InvalidFailMode(other.to_string())),
                }
            }
            "pushinfo" => cfg.push_info = parse_boolean(value),
            "noverify" => cfg.no_verify = parse_boolean(value),
            "prompts" => cfg.prompts = clamp_prompts(cfg.prompts, parse_int(value)),
            "autopush" => cfg.auto_push = parse_boolean(value),
            "accept_env_factor" => cfg.accept_env_factor = parse_boolean(value),
            "fallback_local_ip" => cfg.local_ip_fallback = parse_boolean(value),
            "https_timeout" => cfg.timeout = resolve_timeout(parse_int(value)),
            "taexpire" => cfg.trust_expire_minutes = clamp_trust_expire(parse_int(value)),
            "taprefix" => cfg.trust_prefix = value.to_string(),
            "send_gecos" => cfg.send_gecos = parse_boolean(value),
            other => return Err(ConfigError::UnknownOption(other.to_string())),
        }
        Ok(())
    }

    pub fn build(self) -> DuoConfig {
        self.cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = "\
; login_duo configuration
[duo]
ikey = DIABC
skey = s3cret
host = api-test.example.com
groups = wheel duo-*
failmode = secure
taexpire = 10
taprefix = /var/lib/duo
prompts = 2
https_timeout = 5
fallback_local_ip = yes
";

    #[test]
    fn test_defaults() {
        let cfg = DuoConfig::default();
        assert_eq!(cfg.fail_mode, FailMode::Safe);
        assert_eq!(cfg.prompts, MAX_PROMPTS);
        assert_eq!(cfg.timeout, Timeout::Unlimited);
        assert_eq!(cfg.trust_expire_minutes, 0);
        assert!(cfg.trust_prefix.is_empty());
        assert!(cfg.groups.is_empty());
    }

    #[test]
    fn test_parse_sample() {
        let (logger, buf) = Logger::buffered();
        let cfg = DuoConfig::parse(SAMPLE, &logger);

        assert_eq!(cfg.ikey.as_deref(), Some("DIABC"));
        assert_eq!(cfg.skey.as_deref(), Some("s3cret"));
        assert_eq!(cfg.api_host.as_deref(), Some("api-test.example.com"));
        assert_eq!(cfg.groups, vec!["wheel", "duo-*"]);
        assert_eq!(cfg.fail_mode, FailMode::Secure);
        assert_eq!(cfg.trust_expire_minutes, 10);
        assert_eq!(cfg.trust_prefix, "/var/lib/duo");
        assert_eq!(cfg.prompts, 2);
        assert_eq!(cfg.timeout, Timeout::Millis(5000));
        assert!(cfg.local_ip_fallback);
        assert!(buf.lock().unwrap().is_empty());
    }

    #[test]
    fn test_bad_options_are_logged_not_fatal() {
        let (logger, buf) = Logger::buffered();
        let cfg = DuoConfig::parse(
            "failmode = maybe\nbogus = 1\nnot a pair\ntaexpire = 1000\n",
            &logger,
        );

        assert_eq!(cfg.fail_mode, FailMode::Safe);
        assert_eq!(cfg.trust_expire_minutes, 60);

        let lines = buf.lock().unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0].1,
            "Invalid configuration on line 1: Invalid failmode: 'maybe'"
        );
        assert_eq!(lines[1].0, Priority::Warning);
        assert!(lines[2].1.contains("line 3"));
    }

    #[test]
    fn test_too_many_groups_clears_list() {
        let mut builder = ConfigBuilder::default();
        let many = (0..=MAX_GROUPS)
            .map(|i| format!("g{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(
            builder.apply("groups", &many),
            Err(ConfigError::TooManyGroups { max: MAX_GROUPS })
        );
        assert!(builder.build().groups.is_empty());
    }

    #[test]
    fn test_group_alias_and_spacing() {
        let mut builder = ConfigBuilder::default();
        builder.apply("group", "admins  ops").unwrap();
        assert_eq!(builder.build().groups, vec!["admins", "ops"]);
    }

    #[test]
    fn test_boolean_options_case_sensitive() {
        let mut builder = ConfigBuilder::default();
        builder.apply("autopush", "Yes").unwrap();
        builder.apply("pushinfo", "on").unwrap();
        let cfg = builder.build();
        assert!(!cfg.auto_push);
        assert!(cfg.push_info);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let mut builder = ConfigBuilder::default();
        builder.apply("skey", "topsecret").unwrap();
        let out = format!("{:?}", builder.build());
        assert!(!out.contains("topsecret"));
        assert!(out.contains("<redacted>"));
    }

    #[test]
    fn test_load_from_file() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(SAMPLE.as_bytes())?;
        let (logger, _buf) = Logger::buffered();
        let cfg = DuoConfig::load(file.path(), &logger)?;
        assert_eq!(cfg.groups.len(), 2);
        Ok(())
    }

    #[test]
    fn test_load_missing_file_errors() {
        let (logger, _buf) = Logger::buffered();
        assert!(DuoConfig::load(Path::new("/nonexistent/duo.conf"), &logger).is_err());
    }
}
