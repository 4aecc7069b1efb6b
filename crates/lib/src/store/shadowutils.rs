use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Command;

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use cap_std_ext::cap_std;
use cap_std_ext::cap_std::fs::{Dir, Permissions};
use cap_std_ext::dirext::CapStdExtDirExt;
use fn_error_context::context;
use ksaccounts_sysusers::nameservice::passwd::PasswdEntry;
use ksaccounts_sysusers::UserDb;
use ksaccounts_utils::CommandRunExt;
use rustix::fs::{chownat, AtFlags, Gid, Uid};

use super::{check_credential_args, check_ssh_key_args, IdentityStore, StoreError};

const SSH_DIR: &str = ".ssh";
const AUTHORIZED_KEYS: &str = "authorized_keys";
const SSH_DIR_MODE: u32 = 0o700;
const AUTHORIZED_KEYS_MODE: u32 = 0o600;

/// An identity store backed by shadow-utils, operating on a target root.
#[derive(Debug)]
pub struct ShadowUtilsStore {
    root: Dir,
    root_path: Utf8PathBuf,
    create_home: bool,
}

impl ShadowUtilsStore {
    /// Open the system rooted at `root`.  With `create_home`, new
    /// accounts get a home directory populated from the target's skeleton.
    #[context("Opening target root {root}")]
    pub fn open(root: &Utf8Path, create_home: bool) -> Result<Self> {
        let dir = Dir::open_ambient_dir(root, cap_std::ambient_authority())?;
        Ok(Self {
            root: dir,
            root_path: root.to_owned(),
            create_home,
        })
    }

    /// A directory handle on the target root.
    pub fn root(&self) -> &Dir {
        &self.root
    }

    fn tool(&self, name: &str) -> Command {
        let mut c = Command::new(name);
        c.arg("--root").arg(self.root_path.as_str());
        c
    }

    fn load_db(&self) -> Result<UserDb, StoreError> {
        Ok(UserDb::load(&self.root)?)
    }

    fn useradd(&self, username: &str) -> Command {
        let homearg = if self.create_home {
            "--create-home"
        } else {
            "--no-create-home"
        };
        let mut c = self.tool("useradd");
        c.args([homearg, username]);
        c
    }

    /// The `chpasswd` invocation and the line to feed it on stdin.  The
    /// secret never goes in argv where any local user can see it.
    fn chpasswd(&self, username: &str, password: &str, is_hashed: bool) -> (Command, String) {
        let mut c = self.tool("chpasswd");
        if is_hashed {
            c.arg("--encrypted");
        }
        (c, format!("{username}:{password}\n"))
    }

    fn usermod_lock(&self, username: &str, locked: bool) -> Command {
        let lockarg = if locked { "--lock" } else { "--unlock" };
        let mut c = self.tool("usermod");
        c.args([lockarg, username]);
        c
    }

    /// Hash (or copy) the password into shadow, then apply the lock flag.
    /// Both creation and update end here.
    fn apply_password(
        &self,
        username: &str,
        password: &str,
        is_hashed: bool,
        locked: bool,
    ) -> Result<(), StoreError> {
        let (mut c, input) = self.chpasswd(username, password, is_hashed);
        c.log_debug()
            .run_with_stdin(input.as_bytes())
            .map_err(StoreError::Command)?;
        self.usermod_lock(username, locked)
            .log_debug()
            .run_capture_stderr()
            .map_err(StoreError::Command)
    }
}

impl IdentityStore for ShadowUtilsStore {
    fn exists(&self, username: &str) -> Result<bool, StoreError> {
        Ok(self.load_db()?.contains(username))
    }

    fn create_user(
        &mut self,
        username: &str,
        password: &str,
        is_hashed: bool,
        locked: bool,
    ) -> Result<(), StoreError> {
        check_credential_args(username, password, is_hashed)?;
        // useradd leaves the password locked until chpasswd runs
        self.useradd(username)
            .log_debug()
            .run_capture_stderr()
            .map_err(StoreError::Command)?;
        self.apply_password(username, password, is_hashed, locked)
    }

    fn set_password(
        &mut self,
        username: &str,
        password: &str,
        is_hashed: bool,
        locked: bool,
    ) -> Result<(), StoreError> {
        check_credential_args(username, password, is_hashed)?;
        self.apply_password(username, password, is_hashed, locked)
    }

    fn set_ssh_key(&mut self, username: &str, key: &str) -> Result<(), StoreError> {
        check_ssh_key_args(username, key)?;
        let db = self.load_db()?;
        let user = db
            .user(username)
            .ok_or_else(|| StoreError::NoSuchUser(username.to_owned()))?;
        if install_authorized_key(&self.root, user, key.trim())? {
            tracing::debug!("Added SSH key for {username}");
        } else {
            tracing::debug!("SSH key for {username} already present");
        }
        Ok(())
    }
}

fn ssh_dir_path(user: &PasswdEntry) -> std::path::PathBuf {
    Path::new(user.home_dir_relative()).join(SSH_DIR)
}

/// The keys currently authorized for `user`, without blank lines or
/// comments.  A missing file means no keys.
pub fn authorized_keys(root: &Dir, user: &PasswdEntry) -> std::io::Result<Vec<String>> {
    let path = ssh_dir_path(user).join(AUTHORIZED_KEYS);
    let Some(mut f) = root.open_optional(&path)? else {
        return Ok(Vec::new());
    };
    let mut buf = String::new();
    f.read_to_string(&mut buf)?;
    Ok(buf
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(ToOwned::to_owned)
        .collect())
}

/// Append `key` to the user's `authorized_keys` unless an identical
/// line is already there.  Returns whether the file changed.
///
/// All access goes through the root directory handle, so symlinks in
/// the target cannot redirect the write outside of it.
fn install_authorized_key(root: &Dir, user: &PasswdEntry, key: &str) -> std::io::Result<bool> {
    let sshdir_path = ssh_dir_path(user);
    root.create_dir_all(&sshdir_path)?;
    root.set_permissions(
        &sshdir_path,
        Permissions::from_std(std::fs::Permissions::from_mode(SSH_DIR_MODE)),
    )?;
    let sshdir = root.open_dir(&sshdir_path)?;
    // Directory handles are O_PATH, which fchown(2) refuses
    let (uid, gid) = (Some(Uid::from_raw(user.uid)), Some(Gid::from_raw(user.gid)));
    chownat(&sshdir, "", uid, gid, AtFlags::EMPTY_PATH)?;

    let mut content = match sshdir.open_optional(AUTHORIZED_KEYS)? {
        Some(mut f) => {
            let mut buf = String::new();
            f.read_to_string(&mut buf)?;
            buf
        }
        None => String::new(),
    };
    if content.lines().any(|l| l.trim() == key) {
        return Ok(false);
    }
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str(key);
    content.push('\n');
    sshdir.atomic_write_with_perms(
        AUTHORIZED_KEYS,
        content,
        Permissions::from_std(std::fs::Permissions::from_mode(AUTHORIZED_KEYS_MODE)),
    )?;
    chownat(&sshdir, AUTHORIZED_KEYS, uid, gid, AtFlags::SYMLINK_NOFOLLOW)?;
    Ok(true)
}
