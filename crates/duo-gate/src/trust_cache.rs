//! Trusted-origin cache
//!
//! A successful verification leaves a marker file at
//! `<root>/.ds-<user>-<origin>`. The marker's mtime is the only state: a
//! marker younger than the configured window means the origin is trusted,
//! and every trusted hit slides the window forward by touching it again.
//! Contents are never read.
//!
//! No locking is done. Concurrent logins may race on the same marker, but
//! trust is always re-read from disk, so the worst outcome is a missed or
//! duplicated refresh.

use chrono::{DateTime, Utc};
use duo_core::{DuoConfig, Identity, Logger, Priority};
use std::fs::{self, FileTimes, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// File name prefix shared with external cleanup jobs
pub const MARKER_PREFIX: &str = ".ds-";

/// Origin used when none is known
pub const FALLBACK_ORIGIN: &str = "localhost";

/// Derive the marker path for a user and origin
pub fn marker_path(identity: &Identity, trust_prefix: &str, origin: Option<&str>) -> PathBuf {
    let origin = origin.unwrap_or(FALLBACK_ORIGIN);
    let root = if trust_prefix.is_empty() {
        identity.home.as_path()
    } else {
        Path::new(trust_prefix)
    };
    root.join(format!("{}{}-{}", MARKER_PREFIX, identity.name, origin))
}

/// Create the marker if needed and stamp its access and modification times.
/// Failures are logged, never returned: a missed refresh only shortens the
/// next trust window.
pub fn touch_marker(path: &Path, now: SystemTime, logger: &Logger) {
    let file = match OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
    {
        Ok(file) => file,
        Err(e) => {
            logger.log(
                Priority::Err,
                "Couldn't write cached access file",
                Some(&path.to_string_lossy()),
                None,
                Some(&e.to_string()),
            );
            return;
        }
    };

    let times = FileTimes::new().set_accessed(now).set_modified(now);
    if let Err(e) = file.set_times(times) {
        logger.log(
            Priority::Err,
            "Couldn't write cached access file mod time",
            Some(&path.to_string_lossy()),
            None,
            Some(&e.to_string()),
        );
    }
}

/// Trusted-origin cache over marker files
pub struct TrustCache<'a> {
    expire_minutes: u32,
    prefix: &'a str,
    logger: &'a Logger,
}

impl<'a> TrustCache<'a> {
    pub fn new(config: &'a DuoConfig, logger: &'a Logger) -> Self {
        Self {
            expire_minutes: config.trust_expire_minutes,
            prefix: &config.trust_prefix,
            logger,
        }
    }

    /// Whether a non-zero trust window is configured
    pub fn enabled(&self) -> bool {
        self.expire_minutes > 0
    }

    pub fn marker_path(&self, identity: &Identity, origin: Option<&str>) -> PathBuf {
        marker_path(identity, self.prefix, origin)
    }

    /// Check whether `origin` is trusted for `identity` right now
    pub fn is_trusted(&self, identity: &Identity, origin: Option<&str>) -> bool {
        self.is_trusted_at(identity, origin, Utc::now())
    }

    /// Check trust as of `now`. A hit refreshes the marker to `now`.
    ///
    /// Any failure to read the marker, not only its absence, counts as
    /// untrusted.
    pub fn is_trusted_at(
        &self,
        identity: &Identity,
        origin: Option<&str>,
        now: DateTime<Utc>,
    ) -> bool {
        let path = self.marker_path(identity, origin);

        let modified = match fs::metadata(&path).and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "no usable trust marker");
                return false;
            }
        };

        // Compared as SystemTime so any mtime the filesystem can hold is
        // representable. A marker from the future counts as just written;
        // with a zero window nothing is ever trusted.
        let now = SystemTime::from(now);
        let elapsed = now.duration_since(modified).map_or(0, |d| d.as_secs());
        let window = u64::from(self.expire_minutes) * 60;

        if elapsed < window {
            tracing::debug!(path = %path.display(), elapsed, window, "trust marker fresh");
            touch_marker(&path, now, self.logger);
            true
        } else {
            tracing::debug!(path = %path.display(), elapsed, window, "trust marker stale");
            false
        }
    }

    /// Record a successful remote verification for this user and origin
    pub fn record_success(&self, identity: &Identity, origin: Option<&str>) {
        let path = self.marker_path(identity, origin);
        touch_marker(&path, SystemTime::now(), self.logger);
    }
}
