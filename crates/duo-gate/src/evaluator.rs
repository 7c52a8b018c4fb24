//! Login policy evaluation
//!
//! Sequences the group gate and the trust cache:
//! out of scope → bypass; in scope and trusted → skip the challenge;
//! in scope and untrusted → challenge; gate failure → fail mode.

use crate::groups::{GroupDecision, GroupGate, GroupSource};
use crate::trust_cache::{TrustCache, FALLBACK_ORIGIN};
use duo_core::{DuoConfig, FailMode, Identity, Logger, Priority};
use serde::Serialize;

/// Result of a policy evaluation
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    /// What the caller should do
    pub action: Action,

    /// Human-readable reason
    pub details: String,

    pub user: String,

    /// Origin used for the trust key
    pub origin: String,
}

/// Actions for the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// User is not subject to second-factor policy
    Bypass,
    /// Recently verified from this origin; skip the challenge
    Trusted,
    /// Perform the remote challenge
    Challenge,
    /// Policy could not be evaluated; fail mode lets the login through
    FailOpen,
    /// Policy could not be evaluated; fail mode refuses the login
    FailClosed,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Bypass => "bypass",
            Action::Trusted => "trusted",
            Action::Challenge => "challenge",
            Action::FailOpen => "fail_open",
            Action::FailClosed => "fail_closed",
        }
    }

    /// Process exit status for this action
    pub fn exit_code(&self) -> i32 {
        match self {
            Action::Bypass | Action::Trusted | Action::FailOpen => 0,
            Action::FailClosed => 1,
            Action::Challenge => 2,
        }
    }
}

/// Policy evaluator over one loaded configuration
pub struct PolicyEvaluator<'a, S: GroupSource> {
    fail_mode: FailMode,
    gate: GroupGate<'a, S>,
    cache: TrustCache<'a>,
    logger: &'a Logger,
}

impl<'a, S: GroupSource> PolicyEvaluator<'a, S> {
    pub fn new(config: &'a DuoConfig, source: S, logger: &'a Logger) -> Self {
        Self {
            fail_mode: config.fail_mode,
            gate: GroupGate::new(&config.groups, source, logger),
            cache: TrustCache::new(config, logger),
            logger,
        }
    }

    pub fn trust_cache(&self) -> &TrustCache<'a> {
        &self.cache
    }

    /// Evaluate a login attempt
    pub fn evaluate(&self, identity: &Identity, origin: Option<&str>) -> Decision {
        let shown_origin = origin.unwrap_or(FALLBACK_ORIGIN);
        let decide = |action: Action, details: String| Decision {
            action,
            details,
            user: identity.name.clone(),
            origin: shown_origin.to_string(),
        };

        match self.gate.evaluate(identity) {
            GroupDecision::DoesNotApply => {
                tracing::debug!(user = %identity.name, "user outside configured groups");
                decide(
                    Action::Bypass,
                    "User is not in any configured group".to_string(),
                )
            }
            GroupDecision::EvaluationError(reason) => {
                let action = match self.fail_mode {
                    FailMode::Safe => Action::FailOpen,
                    FailMode::Secure => Action::FailClosed,
                };
                self.logger.log(
                    Priority::Warning,
                    &format!("Failsafe policy {}", self.fail_mode.as_str()),
                    Some(&identity.name),
                    Some(shown_origin),
                    Some(&reason),
                );
                decide(
                    action,
                    format!(
                        "Group membership undetermined ({}), failmode {}",
                        reason,
                        self.fail_mode.as_str()
                    ),
                )
            }
            GroupDecision::Applies => {
                if self.cache.is_trusted(identity, origin) {
                    self.logger.log(
                        Priority::Info,
                        "Skipped Duo login with trusted access",
                        Some(&identity.name),
                        Some(shown_origin),
                        None,
                    );
                    decide(Action::Trusted, "Origin verified recently".to_string())
                } else {
                    decide(
                        Action::Challenge,
                        "Second-factor verification required".to_string(),
                    )
                }
            }
        }
    }
}
