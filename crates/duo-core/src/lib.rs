//! Duo Core - Shared functionality for the duo-gate tools
//!
//! Configuration, option clamping, the logging façade, and the small pieces
//! of operating-system plumbing (passwd lookup, local address discovery)
//! that the login policy core depends on.

pub mod config;
pub mod identity;
pub mod log;
pub mod net;
pub mod options;
pub mod paths;

pub use config::{ConfigError, DuoConfig, FailMode};
pub use identity::Identity;
pub use log::{LogSink, Logger, Priority};
pub use options::Timeout;
pub use paths::Paths;
