use anyhow::{bail, Context, Result};
use questline_engine::MemoryStore;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// How long a command waits for another process to release the state.
pub const LOCK_WAIT: Duration = Duration::from_secs(10);

/// A lock file older than this was left by a crashed process.
const STALE_AFTER: Duration = Duration::from_secs(300);

/// `$QUESTLINE_HOME`, or `~/.questline`.
pub fn questline_home() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("QUESTLINE_HOME") {
        return Ok(PathBuf::from(dir));
    }
    let home = std::env::var("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home).join(".questline"))
}

pub fn ensure_questline_home() -> Result<PathBuf> {
    let dir = questline_home()?;
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    Ok(dir)
}

pub fn state_path() -> Result<PathBuf> {
    Ok(ensure_questline_home()?.join("state.json"))
}

pub fn load_store() -> Result<MemoryStore> {
    let p = state_path()?;
    MemoryStore::load(&p).with_context(|| format!("read {}", p.display()))
}

/// Swap in whatever other processes saved since the last load.
pub fn reload_store(store: &MemoryStore) -> Result<()> {
    let p = state_path()?;
    store.reload(&p).with_context(|| format!("read {}", p.display()))
}

pub fn save_store(store: &MemoryStore) -> Result<()> {
    let p = state_path()?;
    store.save(&p).with_context(|| format!("write {}", p.display()))
}

/// Exclusive hold on `state.json` across processes. Every load, mutate,
/// save cycle runs under one of these; dropping it removes the lock file.
#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
}

impl StateLock {
    /// One attempt. `None` while another process holds the lock.
    pub fn try_acquire(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join("state.lock");
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                // owner pid
                writeln!(file, "{}", std::process::id()).with_context(|| format!("write {}", path.display()))?;
                Ok(Some(Self { path }))
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if is_stale(&path) {
                    warn!(path = %path.display(), "removing stale state lock");
                    fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
                    return Self::try_acquire(dir);
                }
                Ok(None)
            }
            Err(e) => Err(e).with_context(|| format!("create {}", path.display())),
        }
    }

    /// Retry until `wait` runs out.
    pub async fn acquire(dir: &Path, wait: Duration) -> Result<Self> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(lock) = Self::try_acquire(dir)? {
                return Ok(lock);
            }
            if tokio::time::Instant::now() >= deadline {
                bail!(
                    "state is in use by another questline process (lock: {})",
                    dir.join("state.lock").display()
                );
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "could not release state lock");
        }
    }
}

fn is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age > STALE_AFTER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("questline-{name}-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn second_holder_waits_for_release() {
        let dir = scratch("lock");
        let first = StateLock::try_acquire(&dir).unwrap().unwrap();
        assert!(StateLock::try_acquire(&dir).unwrap().is_none());

        drop(first);
        assert!(!dir.join("state.lock").exists());
        let second = StateLock::try_acquire(&dir).unwrap();
        assert!(second.is_some());
        drop(second);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn stale_lock_is_taken_over() {
        let dir = scratch("stale");
        let path = dir.join("state.lock");
        fs::write(&path, "99999\n").unwrap();
        let old = SystemTime::now() - STALE_AFTER - Duration::from_secs(60);
        fs::File::options().write(true).open(&path).unwrap().set_modified(old).unwrap();

        let lock = StateLock::try_acquire(&dir).unwrap();
        assert!(lock.is_some());
        drop(lock);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn acquire_gives_up_while_held() {
        let dir = scratch("busy");
        let held = StateLock::try_acquire(&dir).unwrap().unwrap();

        let err = StateLock::acquire(&dir, Duration::from_millis(120)).await.unwrap_err();
        assert!(err.to_string().contains("in use"));

        drop(held);
        let lock = StateLock::acquire(&dir, Duration::from_millis(120)).await.unwrap();
        drop(lock);
        fs::remove_dir_all(&dir).unwrap();
    }
}
