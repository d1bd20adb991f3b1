use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

const STALE_MARKER_AGE: Duration = Duration::from_secs(24 * 60 * 60);
const IDENTITY_ATTEMPTS: usize = 3;

/// How a [`ProcessLock`] enforces exclusivity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    /// Advisory OS lock; falls back to [`LockMode::CreateFile`] when the
    /// platform does not support it.
    #[default]
    Exclusive,
    /// Atomic create-new marker file holding the owner PID.
    CreateFile,
    /// Never blocks. Meant for automated tests.
    Disabled,
}

impl LockMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "exclusive" => Some(LockMode::Exclusive),
            "create_file" | "create-file" | "file" => Some(LockMode::CreateFile),
            "disabled" | "none" | "test" => Some(LockMode::Disabled),
            _ => None,
        }
    }
}

#[derive(Debug)]
enum Held {
    Advisory(File),
    Marker,
    Noop,
}

/// Cross-process guard ensuring one sync run per lock path.
///
/// The lock is released on [`ProcessLock::release`] or on drop.
#[derive(Debug)]
pub struct ProcessLock {
    path: PathBuf,
    mode: LockMode,
    held: Option<Held>,
}

impl ProcessLock {
    pub fn new(path: impl Into<PathBuf>, mode: LockMode) -> Self {
        Self {
            path: path.into(),
            mode,
            held: None,
        }
    }

    pub fn disabled() -> Self {
        Self::new(PathBuf::new(), LockMode::Disabled)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        self.held.is_some()
    }

    /// Returns `false` when another live process owns the lock or the lock
    /// could not be taken for any OS reason.
    pub fn acquire(&mut self) -> bool {
        if self.held.is_some() {
            return true;
        }
        if self.mode == LockMode::Disabled {
            self.held = Some(Held::Noop);
            return true;
        }
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
            && let Err(err) = fs::create_dir_all(parent)
        {
            warn!(path = %self.path.display(), error = %err, "create lockfile directory failed");
            return false;
        }
        let held = match self.mode {
            LockMode::Exclusive => self.acquire_advisory(),
            LockMode::CreateFile => self.acquire_marker(),
            LockMode::Disabled => Ok(Some(Held::Noop)),
        };
        match held {
            Ok(Some(held)) => {
                debug!(path = %self.path.display(), "acquired process lock");
                self.held = Some(held);
                true
            }
            Ok(None) => false,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "lock acquisition failed");
                false
            }
        }
    }

    /// Idempotent. The lockfile is unlinked before it is unlocked.
    pub fn release(&mut self) {
        let Some(held) = self.held.take() else {
            return;
        };
        if matches!(held, Held::Noop) {
            return;
        }
        if let Err(err) = fs::remove_file(&self.path)
            && err.kind() != ErrorKind::NotFound
        {
            debug!(path = %self.path.display(), error = %err, "remove lockfile failed");
        }
        if let Held::Advisory(file) = held {
            let _ = FileExt::unlock(&file);
        }
    }

    fn acquire_advisory(&self) -> std::io::Result<Option<Held>> {
        for _ in 0..IDENTITY_ATTEMPTS {
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&self.path)?;
            match file.try_lock_exclusive() {
                Ok(()) if handle_matches_path(&file, &self.path) => {
                    write_owner(&file);
                    return Ok(Some(Held::Advisory(file)));
                }
                Ok(()) => {
                    // Locked a file the previous owner already unlinked.
                    debug!(path = %self.path.display(), "lockfile replaced while locking; retrying");
                    let _ = FileExt::unlock(&file);
                }
                Err(err) => return self.advisory_failed(file, err),
            }
        }
        Ok(None)
    }

    fn advisory_failed(&self, file: File, err: std::io::Error) -> std::io::Result<Option<Held>> {
        match err {
            err if is_lock_held(&err) => Ok(None),
            err if is_unsupported(&err) => {
                drop(file);
                warn!(
                    path = %self.path.display(),
                    "advisory locks unsupported; falling back to marker file"
                );
                let _ = fs::remove_file(&self.path);
                self.acquire_marker()
            }
            err => Err(err),
        }
    }

    fn acquire_marker(&self) -> std::io::Result<Option<Held>> {
        for _ in 0..2 {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path)
            {
                Ok(file) => {
                    write_owner(&file);
                    return Ok(Some(Held::Marker));
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    if !marker_is_stale(&self.path) {
                        return Ok(None);
                    }
                    warn!(path = %self.path.display(), "removing stale lock marker");
                    fs::remove_file(&self.path)?;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        self.release();
    }
}

fn write_owner(mut file: &File) {
    let _ = file.set_len(0);
    let _ = writeln!(file, "{}", std::process::id());
}

/// Whether `file` is still the file reachable at `path`.
#[cfg(unix)]
fn handle_matches_path(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (file.metadata(), fs::metadata(path)) {
        (Ok(held), Ok(current)) => held.dev() == current.dev() && held.ino() == current.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn handle_matches_path(_file: &File, path: &Path) -> bool {
    path.exists()
}

fn is_lock_held(err: &std::io::Error) -> bool {
    if err.kind() == ErrorKind::WouldBlock {
        return true;
    }
    // ERROR_LOCK_VIOLATION on Windows.
    matches!(err.raw_os_error(), Some(33))
}

fn is_unsupported(err: &std::io::Error) -> bool {
    if err.kind() == ErrorKind::Unsupported {
        return true;
    }
    // ENOLCK / EOPNOTSUPP
    matches!(err.raw_os_error(), Some(37) | Some(95))
}

fn marker_is_stale(path: &Path) -> bool {
    let owner = fs::File::open(path).ok().and_then(|mut file| {
        let mut contents = String::new();
        file.read_to_string(&mut contents).ok()?;
        contents.trim().parse::<u32>().ok()
    });
    if let Some(pid) = owner
        && let Some(alive) = process_alive(pid)
    {
        return !alive;
    }
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > STALE_MARKER_AGE)
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> Option<bool> {
    Some(Path::new("/proc").join(pid.to_string()).exists())
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> Option<bool> {
    None
}
