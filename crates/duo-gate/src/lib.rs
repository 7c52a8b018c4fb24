//! duo-gate - Local policy decisions for second-factor login
//!
//! Before a remote second-factor challenge is attempted two questions are
//! answered locally:
//! - is this user subject to second-factor policy at all? ([`GroupGate`])
//! - did this user recently verify from this origin? ([`TrustCache`])
//!
//! [`PolicyEvaluator`] sequences the two and maps environment failures onto
//! the configured fail mode.

pub mod evaluator;
pub mod groups;
pub mod trust_cache;

pub use evaluator::{Action, Decision, PolicyEvaluator};
pub use groups::{
    GroupDecision, GroupError, GroupGate, GroupMembership, GroupSource, StaticGroups, SystemGroups,
};
pub use trust_cache::TrustCache;
