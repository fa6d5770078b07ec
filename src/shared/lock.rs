use anyhow::{Context, Result};
use fs2::FileExt;
use log::debug;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

// Exclusive OS file lock held for the gateway lifetime.
// Two gateways would fight over the same receiver link.
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl LockGuard {
    // Take the lock or fail right away when another gateway holds it.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).with_context(|| {
                format!("creating lock directory failed: {}", parent.display())
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("opening lock file failed: {}", path.display()))?;

        file.try_lock_exclusive().with_context(|| {
            format!("another gateway is already running: {}", path.display())
        })?;
        debug!("holding lock {}", path.display());

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        debug!("released lock {}", self.path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_gateway_is_refused() {
        let path = std::env::temp_dir()
            .join(format!("vcu-lock-{}", std::process::id()))
            .join("gateway.lock");
        let first = LockGuard::acquire(&path).unwrap();
        let second = LockGuard::acquire(&path);
        assert!(second.is_err());
        drop(first);
        assert!(LockGuard::acquire(&path).is_ok());
    }
}
