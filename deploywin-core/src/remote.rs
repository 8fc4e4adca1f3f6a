use std::cell::RefCell;
use std::path::Path;

use git2::{
    Cred, CredentialType, FetchOptions, PushOptions, RemoteCallbacks,
    Repository as Git2Repository,
};
use tracing::{debug, warn};

use crate::error::{RepositoryError, Result};

pub const DEFAULT_TOKEN_ENV: &str = "DEPLOYWIN_TOKEN";

/// Transfer statistics of a fetch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferProgress {
    pub received_objects: usize,
    pub received_bytes: usize,
}

/// Remote operations for a repository
pub struct RemoteOps<'a> {
    repo: &'a Git2Repository,
    token_env: &'a str,
}

impl<'a> RemoteOps<'a> {
    pub fn new(repo: &'a Git2Repository) -> Self {
        RemoteOps {
            repo,
            token_env: DEFAULT_TOKEN_ENV,
        }
    }

    /// Read the access token from `token_env` instead of the default variable
    pub fn with_token_env(mut self, token_env: &'a str) -> Self {
        self.token_env = token_env;
        self
    }

    pub fn add_remote(&self, name: &str, url: &str) -> Result<()> {
        self.repo.remote(name, url)?;
        Ok(())
    }

    pub fn has_remote(&self, name: &str) -> bool {
        self.repo.find_remote(name).is_ok()
    }

    /// Fetch all branches into `refs/remotes/<remote>/` and all tags
    pub fn fetch(&self, remote_name: &str) -> Result<TransferProgress> {
        let mut remote = self.repo.find_remote(remote_name)?;
        let mut fetch_options = FetchOptions::new();
        fetch_options.remote_callbacks(self.callbacks());

        let branches = format!("+refs/heads/*:refs/remotes/{remote_name}/*");
        remote.fetch(
            &[branches.as_str(), "+refs/tags/*:refs/tags/*"],
            Some(&mut fetch_options),
            None,
        )?;

        let stats = remote.stats();
        let progress = TransferProgress {
            received_objects: stats.received_objects(),
            received_bytes: stats.received_bytes(),
        };
        debug!(remote = remote_name, objects = progress.received_objects, "fetched");
        Ok(progress)
    }

    /// Push refspecs, failing if the remote rejects any of them
    pub fn push(&self, remote_name: &str, refspecs: &[&str]) -> Result<()> {
        let mut remote = self.repo.find_remote(remote_name)?;
        let rejected: RefCell<Option<(String, String)>> = RefCell::new(None);

        {
            let mut callbacks = self.callbacks();
            callbacks.push_update_reference(|refname, status| {
                if let Some(msg) = status {
                    warn!(refname, reason = msg, "push rejected");
                    rejected
                        .borrow_mut()
                        .get_or_insert_with(|| (refname.to_string(), msg.to_string()));
                }
                Ok(())
            });

            let mut push_options = PushOptions::new();
            push_options.remote_callbacks(callbacks);
            remote.push(refspecs, Some(&mut push_options))?;
        }

        if let Some((refname, reason)) = rejected.into_inner() {
            return Err(RepositoryError::PushRejected {
                remote: remote_name.to_string(),
                refname,
                reason,
            });
        }

        debug!(remote = remote_name, ?refspecs, "pushed");
        Ok(())
    }

    /// Token from the environment first, then SSH keys, then the SSH agent
    fn callbacks<'cb>(&self) -> RemoteCallbacks<'cb> {
        let token = std::env::var(self.token_env).ok().filter(|t| !t.is_empty());
        let mut callbacks = RemoteCallbacks::new();

        callbacks.credentials(move |_url, username_from_url, allowed_types| {
            if let Some(token) = &token {
                if allowed_types.contains(CredentialType::USER_PASS_PLAINTEXT) {
                    return Cred::userpass_plaintext("x-access-token", token);
                }
            }

            let username = username_from_url.unwrap_or("git");
            if let Ok(home) = std::env::var("HOME") {
                let ssh_dir = Path::new(&home).join(".ssh");
                for key in ["id_ed25519", "id_rsa", "id_ecdsa"] {
                    let key_path = ssh_dir.join(key);
                    if key_path.exists() {
                        return Cred::ssh_key(username, None, &key_path, None);
                    }
                }
            }

            Cred::ssh_key_from_agent(username)
        });

        callbacks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::{Commit, FileChange};
    use git2::Signature;
    use tempfile::TempDir;

    #[test]
    fn test_push_and_fetch_through_bare_remote() {
        let dir = TempDir::new().unwrap();
        let bare = Git2Repository::init_bare(dir.path().join("remote.git")).unwrap();
        let repo = Git2Repository::init(dir.path().join("work")).unwrap();
        let sig = Signature::now("Tester", "tester@example.com").unwrap();

        let oid = {
            let commit = Commit::new(&repo);
            commit.stage_changes(&[FileChange::write("a.txt", "a\n")]).unwrap();
            commit.create_with_signature("first", &sig, &sig).unwrap()
        };
        repo.branch("staging", &repo.find_commit(oid).unwrap(), false).unwrap();

        let ops = RemoteOps::new(&repo);
        ops.add_remote("origin", bare.path().to_str().unwrap()).unwrap();
        assert!(ops.has_remote("origin"));

        ops.push("origin", &["+refs/heads/staging:refs/heads/staging"]).unwrap();
        assert_eq!(bare.find_reference("refs/heads/staging").unwrap().target(), Some(oid));

        ops.fetch("origin").unwrap();
        assert_eq!(
            repo.find_reference("refs/remotes/origin/staging").unwrap().target(),
            Some(oid)
        );

        ops.push("origin", &[":refs/heads/staging"]).unwrap();
        assert!(bare.find_reference("refs/heads/staging").is_err());
    }
}
