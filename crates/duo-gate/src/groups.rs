//! Group admission gate
//!
//! Decides whether a user is subject to second-factor policy at all. Each
//! configured entry is a comma-separated list of glob patterns matched
//! against the user's group names; a `!`-prefixed pattern that hits any of
//! the user's groups vetoes that entry. Entries are tried in order and the
//! first match wins. No entries at all means the policy applies to everyone.

use duo_core::{Identity, Logger, Priority};
use glob::Pattern;
use std::ffi::CStr;
use std::io;
use thiserror::Error;

/// Upper bound on supplementary groups fetched per user
const MAX_GROUP_LIST: usize = 65536;

/// Upper bound for the group scratch buffer
const MAX_GR_BUF: usize = 1 << 20;

#[cfg(target_vendor = "apple")]
type RawGid = libc::c_int;
#[cfg(not(target_vendor = "apple"))]
type RawGid = libc::gid_t;

/// Outcome of the group gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupDecision {
    /// The user is subject to second-factor policy
    Applies,
    /// The user is deliberately out of scope
    DoesNotApply,
    /// Membership could not be determined; defer to the fail mode
    EvaluationError(String),
}

#[derive(Error, Debug)]
pub enum GroupError {
    #[error("Group list for {user} exceeds {max} entries")]
    TooManyGroups { user: String, max: usize },

    #[error("Primary group {gid} not found")]
    PrimaryGroupNotFound { gid: u32 },

    #[error("Group lookup failed for gid {gid}: {source}")]
    Lookup {
        gid: u32,
        #[source]
        source: io::Error,
    },

    #[error("Invalid user name: {0:?}")]
    InvalidName(String),
}

/// A resolved set of group memberships, held only while patterns are tested
#[derive(Debug)]
pub struct GroupMembership {
    names: Vec<String>,
}

impl GroupMembership {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl Drop for GroupMembership {
    fn drop(&mut self) {
        tracing::trace!(groups = self.names.len(), "released group resolution");
    }
}

/// Something that can resolve a user's group memberships
pub trait GroupSource {
    fn resolve(&self, identity: &Identity) -> Result<GroupMembership, GroupError>;
}

/// Fixed memberships, for callers that already know them
#[derive(Debug, Clone, Default)]
pub struct StaticGroups {
    names: Vec<String>,
}

impl StaticGroups {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl GroupSource for StaticGroups {
    fn resolve(&self, _identity: &Identity) -> Result<GroupMembership, GroupError> {
        Ok(GroupMembership::new(self.names.clone()))
    }
}

/// The operating system's group database
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemGroups;

impl GroupSource for SystemGroups {
    fn resolve(&self, identity: &Identity) -> Result<GroupMembership, GroupError> {
        let gids = group_list(identity)?;

        let mut names = Vec::with_capacity(gids.len());
        for gid in gids {
            match group_name(gid)? {
                Some(name) => names.push(name),
                None if gid == identity.gid => {
                    return Err(GroupError::PrimaryGroupNotFound { gid });
                }
                None => tracing::debug!(gid, "skipping unnamed group"),
            }
        }

        Ok(GroupMembership::new(names))
    }
}

/// All group ids for a user, primary group included
fn group_list(identity: &Identity) -> Result<Vec<u32>, GroupError> {
    let user = std::ffi::CString::new(identity.name.as_str())
        .map_err(|_| GroupError::InvalidName(identity.name.clone()))?;

    let mut size: usize = 64;
    loop {
        let mut groups: Vec<RawGid> = vec![0; size];
        let mut count = size as libc::c_int;

        // SAFETY: `groups` holds `count` elements and `user` is
        // NUL-terminated.
        let rc = unsafe {
            libc::getgrouplist(
                user.as_ptr(),
                identity.gid as RawGid,
                groups.as_mut_ptr(),
                &mut count,
            )
        };

        if rc >= 0 {
            groups.truncate(count.max(0) as usize);
            return Ok(groups.into_iter().map(|g| g as u32).collect());
        }

        if size >= MAX_GROUP_LIST {
            return Err(GroupError::TooManyGroups {
                user: identity.name.clone(),
                max: MAX_GROUP_LIST,
            });
        }
        size = (count.max(0) as usize).max(size * 2).min(MAX_GROUP_LIST);
    }
}

/// Name for a group id, or None if the id has no entry
fn group_name(gid: u32) -> Result<Option<String>, GroupError> {
    // SAFETY: group is plain old data; an all-zero value is valid.
    let mut grp: libc::group = unsafe { std::mem::zeroed() };
    let mut result: *mut libc::group = std::ptr::null_mut();
    let mut buf: Vec<libc::c_char> = vec![0; 1024];

    loop {
        // SAFETY: all pointers are valid and `buf.len()` is its real length.
        let rc = unsafe {
            libc::getgrgid_r(
                gid as libc::gid_t,
                &mut grp,
                buf.as_mut_ptr(),
                buf.len(),
                &mut result,
            )
        };
        if rc == libc::ERANGE && buf.len() < MAX_GR_BUF {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        if rc == libc::ENOENT || rc == libc::ESRCH {
            return Ok(None);
        }
        if rc != 0 {
            return Err(GroupError::Lookup {
                gid,
                source: io::Error::from_raw_os_error(rc),
            });
        }
        if result.is_null() {
            return Ok(None);
        }

        // SAFETY: on success gr_name points into `buf` and is NUL-terminated.
        let name = unsafe { CStr::from_ptr(grp.gr_name) };
        return Ok(Some(name.to_string_lossy().into_owned()));
    }
}

/// `glob` rejects `**` outside path components; any run of stars means
/// the same as one.
fn collapse_stars(pat: &str) -> String {
    let mut out = String::with_capacity(pat.len());
    for c in pat.chars() {
        if c == '*' && out.ends_with('*') {
            continue;
        }
        out.push(c);
    }
    out
}

/// One configured entry, e.g. `admins,ops-*,!ops-guest`
#[derive(Debug, Clone)]
struct PatternList {
    raw: String,
    items: Vec<PatternItem>,
}

#[derive(Debug, Clone)]
struct PatternItem {
    negated: bool,
    matcher: Matcher,
}

#[derive(Debug, Clone)]
enum Matcher {
    Glob(Pattern),
    /// Patterns `glob` rejects are compared literally
    Literal(String),
}

impl Matcher {
    fn matches(&self, name: &str) -> bool {
        match self {
            Matcher::Glob(p) => p.matches(name),
            Matcher::Literal(s) => s == name,
        }
    }
}

/// Result of matching one name against a pattern list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListMatch {
    Negated,
    NoMatch,
    Match,
}

impl PatternList {
    fn parse(raw: &str) -> Self {
        let items = raw
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|item| {
                let (negated, pat) = match item.strip_prefix('!') {
                    Some(rest) => (true, rest),
                    None => (false, item),
                };
                let pat = collapse_stars(pat);
                let matcher = match Pattern::new(&pat) {
                    Ok(p) => Matcher::Glob(p),
                    Err(e) => {
                        tracing::warn!(pattern = %pat, error = %e, "invalid group glob, matching literally");
                        Matcher::Literal(pat)
                    }
                };
                PatternItem { negated, matcher }
            })
            .collect();

        Self {
            raw: raw.to_string(),
            items,
        }
    }

    fn match_name(&self, name: &str) -> ListMatch {
        let mut found = ListMatch::NoMatch;
        for item in &self.items {
            if item.matcher.matches(name) {
                if item.negated {
                    return ListMatch::Negated;
                }
                found = ListMatch::Match;
            }
        }
        found
    }

    /// True if some group matches and none is vetoed
    fn matches(&self, groups: &[String]) -> bool {
        let mut found = false;
        for group in groups {
            match self.match_name(group) {
                ListMatch::Negated => return false,
                ListMatch::NoMatch => {}
                ListMatch::Match => found = true,
            }
        }
        found
    }
}

/// Gate deciding whether second-factor policy applies to a user
pub struct GroupGate<'a, S: GroupSource> {
    entries: Vec<PatternList>,
    source: S,
    logger: &'a Logger,
}

impl<'a, S: GroupSource> GroupGate<'a, S> {
    pub fn new(patterns: &[String], source: S, logger: &'a Logger) -> Self {
        Self {
            entries: patterns.iter().map(|p| PatternList::parse(p)).collect(),
            source,
            logger,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Evaluate the gate for a user
    pub fn evaluate(&self, identity: &Identity) -> GroupDecision {
        if self.entries.is_empty() {
            return GroupDecision::Applies;
        }

        let membership = match self.source.resolve(identity) {
            Ok(m) => m,
            Err(e) => {
                self.logger.log(
                    Priority::Err,
                    "Couldn't get groups",
                    Some(&identity.name),
                    None,
                    Some(&e.to_string()),
                );
                return GroupDecision::EvaluationError(e.to_string());
            }
        };

        let hit = self
            .entries
            .iter()
            .find(|entry| entry.matches(membership.names()));

        match hit {
            Some(entry) => {
                tracing::debug!(user = %identity.name, entry = %entry.raw, "group entry matched");
                GroupDecision::Applies
            }
            None => GroupDecision::DoesNotApply,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn alice() -> Identity {
        Identity::new("alice", "/home/alice", 1000, 1000)
    }

    fn patterns(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    struct FailingGroups;

    impl GroupSource for FailingGroups {
        fn resolve(&self, _identity: &Identity) -> Result<GroupMembership, GroupError> {
            Err(GroupError::PrimaryGroupNotFound { gid: 1000 })
        }
    }

    /// Counts resolutions so tests can tell whether the database was touched
    struct CountingGroups {
        inner: StaticGroups,
        calls: Cell<u32>,
    }

    impl GroupSource for CountingGroups {
        fn resolve(&self, identity: &Identity) -> Result<GroupMembership, GroupError> {
            self.calls.set(self.calls.get() + 1);
            self.inner.resolve(identity)
        }
    }

    #[test]
    fn test_empty_patterns_always_apply() {
        let (logger, _buf) = Logger::buffered();
        let source = CountingGroups {
            inner: StaticGroups::default(),
            calls: Cell::new(0),
        };
        let gate = GroupGate::new(&[], source, &logger);
        assert_eq!(gate.evaluate(&alice()), GroupDecision::Applies);
        assert_eq!(gate.source().calls.get(), 0);

        let gate = GroupGate::new(&[], FailingGroups, &logger);
        assert_eq!(gate.evaluate(&alice()), GroupDecision::Applies);
    }

    #[test]
    fn test_glob_match_applies() {
        let (logger, _buf) = Logger::buffered();
        let pats = patterns(&["wheel", "duo-*"]);
        let gate = GroupGate::new(&pats, StaticGroups::new(["staff", "duo-admins"]), &logger);
        assert_eq!(gate.evaluate(&alice()), GroupDecision::Applies);
    }

    #[test]
    fn test_no_match_does_not_apply() {
        let (logger, _buf) = Logger::buffered();
        let pats = patterns(&["wheel", "duo-*"]);
        let gate = GroupGate::new(&pats, StaticGroups::new(["staff"]), &logger);
        assert_eq!(gate.evaluate(&alice()), GroupDecision::DoesNotApply);
    }

    #[test]
    fn test_resolution_failure_is_distinct() {
        let (logger, buf) = Logger::buffered();
        let pats = patterns(&["wheel"]);
        let gate = GroupGate::new(&pats, FailingGroups, &logger);

        match gate.evaluate(&alice()) {
            GroupDecision::EvaluationError(reason) => assert!(reason.contains("1000")),
            other => panic!("expected evaluation error, got {:?}", other),
        }

        let lines = buf.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(
            lines[0].1,
            "Couldn't get groups for 'alice': Primary group 1000 not found"
        );
    }

    #[test]
    fn test_negated_pattern_vetoes_entry() {
        let (logger, _buf) = Logger::buffered();
        let pats = patterns(&["duo-*,!duo-guests"]);

        let gate = GroupGate::new(&pats, StaticGroups::new(["duo-admins", "duo-guests"]), &logger);
        assert_eq!(gate.evaluate(&alice()), GroupDecision::DoesNotApply);

        let gate = GroupGate::new(&pats, StaticGroups::new(["duo-admins"]), &logger);
        assert_eq!(gate.evaluate(&alice()), GroupDecision::Applies);
    }

    #[test]
    fn test_veto_is_per_entry() {
        let (logger, _buf) = Logger::buffered();
        let pats = patterns(&["duo-*,!duo-guests", "duo-guests"]);
        let gate = GroupGate::new(&pats, StaticGroups::new(["duo-guests"]), &logger);
        assert_eq!(gate.evaluate(&alice()), GroupDecision::Applies);
    }

    #[test]
    fn test_question_mark_and_class() {
        let list = PatternList::parse("adm?n,ops[0-9]");
        assert_eq!(list.match_name("admin"), ListMatch::Match);
        assert_eq!(list.match_name("ops7"), ListMatch::Match);
        assert_eq!(list.match_name("opsx"), ListMatch::NoMatch);
    }

    #[test]
    fn test_double_star_acts_as_single() {
        let list = PatternList::parse("duo**,a**b");
        assert_eq!(list.match_name("duo-admins"), ListMatch::Match);
        assert_eq!(list.match_name("duo"), ListMatch::Match);
        assert_eq!(list.match_name("axyzb"), ListMatch::Match);
        assert_eq!(list.match_name("staff"), ListMatch::NoMatch);
    }

    #[test]
    fn test_invalid_glob_matches_literally() {
        let list = PatternList::parse("team[");
        assert_eq!(list.match_name("team["), ListMatch::Match);
        assert_eq!(list.match_name("team"), ListMatch::NoMatch);
    }

    #[test]
    fn test_matching_is_case_sensitive() {
        let (logger, _buf) = Logger::buffered();
        let pats = patterns(&["Wheel"]);
        let gate = GroupGate::new(&pats, StaticGroups::new(["wheel"]), &logger);
        assert_eq!(gate.evaluate(&alice()), GroupDecision::DoesNotApply);
    }

    #[test]
    #[ignore = "reads the host group database"]
    fn test_system_groups_for_current_user() {
        let me = Identity::current().unwrap();
        let membership = SystemGroups.resolve(&me).unwrap();
        assert!(!membership.names().is_empty());
    }
}
