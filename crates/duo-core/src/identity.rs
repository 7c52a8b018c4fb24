//! Passwd lookups for the authenticating user

use std::ffi::{CStr, CString, OsStr};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;
use thiserror::Error;

/// Upper bound for the passwd scratch buffer
const MAX_PW_BUF: usize = 1 << 20;

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Unknown user: {0}")]
    NotFound(String),

    #[error("Invalid user name: {0:?}")]
    InvalidName(String),

    #[error("Passwd lookup failed for {name}: {source}")]
    Lookup {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// The passwd fields the login policy core needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Canonical login name
    pub name: String,
    /// Home directory
    pub home: PathBuf,
    pub uid: u32,
    /// Primary group
    pub gid: u32,
}

impl Identity {
    pub fn new(name: impl Into<String>, home: impl Into<PathBuf>, uid: u32, gid: u32) -> Self {
        Self {
            name: name.into(),
            home: home.into(),
            uid,
            gid,
        }
    }

    /// Look up a user by name
    pub fn lookup(name: &str) -> Result<Self, IdentityError> {
        let c_name =
            CString::new(name).map_err(|_| IdentityError::InvalidName(name.to_string()))?;

        with_passwd(name, |pwd, buf, len, result| {
            // SAFETY: all pointers are valid for the duration of the call and
            // `len` is the real length of `buf`.
            unsafe { libc::getpwnam_r(c_name.as_ptr(), pwd, buf, len, result) }
        })
    }

    /// Look up the user running this process
    pub fn current() -> Result<Self, IdentityError> {
        // SAFETY: getuid cannot fail.
        let uid = unsafe { libc::getuid() };
        with_passwd(&format!("uid {}", uid), |pwd, buf, len, result| {
            // SAFETY: as in `lookup`.
            unsafe { libc::getpwuid_r(uid, pwd, buf, len, result) }
        })
    }
}

fn with_passwd<F>(what: &str, mut call: F) -> Result<Identity, IdentityError>
where
    F: FnMut(&mut libc::passwd, *mut libc::c_char, usize, &mut *mut libc::passwd) -> libc::c_int,
{
    // SAFETY: passwd is plain old data; an all-zero value is valid.
    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut result: *mut libc::passwd = std::ptr::null_mut();
    let mut buf: Vec<libc::c_char> = vec![0; 1024];

    loop {
        let rc = call(&mut pwd, buf.as_mut_ptr(), buf.len(), &mut result);
        if rc == libc::ERANGE && buf.len() < MAX_PW_BUF {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        if rc == libc::ENOENT || rc == libc::ESRCH {
            return Err(IdentityError::NotFound(what.to_string()));
        }
        if rc != 0 {
            return Err(IdentityError::Lookup {
                name: what.to_string(),
                source: io::Error::from_raw_os_error(rc),
            });
        }
        if result.is_null() {
            return Err(IdentityError::NotFound(what.to_string()));
        }

        // SAFETY: on success pw_name and pw_dir point into `buf`, which is
        // still alive, and are NUL-terminated.
        let (name, home) = unsafe {
            (
                CStr::from_ptr(pwd.pw_name).to_string_lossy().into_owned(),
                PathBuf::from(OsStr::from_bytes(CStr::from_ptr(pwd.pw_dir).to_bytes())),
            )
        };
        return Ok(Identity::new(name, home, pwd.pw_uid, pwd.pw_gid));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_user_resolves() {
        let me = Identity::current().unwrap();
        assert!(!me.name.is_empty());
        let again = Identity::lookup(&me.name).unwrap();
        assert_eq!(again.uid, me.uid);
        assert_eq!(again.home, me.home);
    }

    #[test]
    fn test_unknown_user() {
        let err = Identity::lookup("no-such-user-duo-gate-test").unwrap_err();
        assert!(matches!(err, IdentityError::NotFound(_)));
    }

    #[test]
    fn test_nul_in_name_rejected() {
        assert!(matches!(
            Identity::lookup("bad\0name"),
            Err(IdentityError::InvalidName(_))
        ));
    }
}
