//! Restricted execution identity
//!
//! The `run_user` configuration parameter names the account untrusted code
//! executes as. It is resolved through the passwd database exactly once, at
//! startup, and carried around as an explicit capability value rather than
//! ambient process state. The drop itself happens between fork and exec and
//! is verified to be irreversible before any untrusted instruction runs.

use nix::unistd::User;

use crate::sandbox::SandboxError;

/// A resolved, droppable user identity
#[derive(Debug, Clone)]
pub struct RestrictedIdentity {
    name: String,
    uid: libc::uid_t,
    gid: libc::gid_t,
}

impl RestrictedIdentity {
    /// Resolve a user name into an identity the sandbox can drop to.
    ///
    /// Fails fast when the account does not exist or when the process lacks
    /// the privilege to switch identity; a judging host must never fall back
    /// to running submissions as itself because of a typo in `run_user`.
    pub fn resolve(name: &str) -> Result<Self, SandboxError> {
        if !nix::unistd::geteuid().is_root() {
            return Err(SandboxError::PrivilegeRequired(name.to_string()));
        }

        let user = User::from_name(name)
            .map_err(|e| SandboxError::UserLookup {
                user: name.to_string(),
                message: e.to_string(),
            })?
            .ok_or_else(|| SandboxError::UnknownUser(name.to_string()))?;

        Ok(Self {
            name: name.to_string(),
            uid: user.uid.as_raw(),
            gid: user.gid.as_raw(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uid(&self) -> libc::uid_t {
        self.uid
    }

    pub fn gid(&self) -> libc::gid_t {
        self.gid
    }

    /// Drop to the restricted identity. Runs in the child between fork and
    /// exec; only async-signal-safe calls are allowed here.
    ///
    /// Order matters: supplementary groups are cleared and the gid set
    /// while we still have the privilege to do so, the uid goes last, and
    /// a final `setuid(0)` probe confirms the drop cannot be undone.
    pub(crate) fn apply_pre_exec(&self) -> std::io::Result<()> {
        unsafe {
            if libc::setgroups(0, std::ptr::null()) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            if libc::setresgid(self.gid, self.gid, self.gid) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            if libc::setresuid(self.uid, self.uid, self.uid) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            // The drop must be irreversible within this process tree
            if self.uid != 0 && libc::setuid(0) == 0 {
                return Err(std::io::Error::other("privilege drop was reversible"));
            }
        }
        Ok(())
    }
}
