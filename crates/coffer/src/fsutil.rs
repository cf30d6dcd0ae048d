use eyre::Context as _;
use fs2::FileExt as _;
use std::{
    fs::{self, File, OpenOptions},
    io::Write as _,
    path::{Path, PathBuf},
};

#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt as _, PermissionsExt as _};

pub const MODE_DIR_PRIVATE: u32 = 0o700;
pub const MODE_FILE_PRIVATE: u32 = 0o600;

fn is_symlink(p: &Path) -> eyre::Result<bool> {
    let md = fs::symlink_metadata(p).with_context(|| format!("stat {}", p.display()))?;
    Ok(md.file_type().is_symlink())
}

/// Create `dir` if needed and clamp it to 0700 on Unix. Symlinked directories are refused.
pub fn ensure_private_dir(dir: &Path) -> eyre::Result<()> {
    if dir.exists() {
        if is_symlink(dir)? {
            eyre::bail!("refusing to use symlinked directory: {}", dir.display());
        }
        if !dir.is_dir() {
            eyre::bail!("expected directory at {}", dir.display());
        }
    } else {
        fs::create_dir_all(dir).with_context(|| format!("create dir {}", dir.display()))?;
    }

    #[cfg(unix)]
    {
        let md = fs::metadata(dir).with_context(|| format!("stat {}", dir.display()))?;
        if md.permissions().mode() & 0o077 != 0 {
            fs::set_permissions(dir, fs::Permissions::from_mode(MODE_DIR_PRIVATE))
                .with_context(|| format!("chmod {MODE_DIR_PRIVATE:o} {}", dir.display()))?;
        }
    }

    Ok(())
}

fn private_options() -> OpenOptions {
    let mut oo = OpenOptions::new();
    #[cfg(unix)]
    {
        oo.mode(MODE_FILE_PRIVATE);
    }
    oo
}

fn tmp_path_for(path: &Path) -> eyre::Result<PathBuf> {
    let parent = path
        .parent()
        .ok_or_else(|| eyre::eyre!("missing parent for {}", path.display()))?;
    let base = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("file");
    let suffix = hex::encode(crate::crypto::random_array::<8>());
    Ok(parent.join(format!(".{base}.tmp.{suffix}")))
}

/// Write `bytes` to a fresh 0600 temp file beside `path`, fsync, then rename over `path`.
pub fn write_private_atomic(path: &Path, bytes: &[u8]) -> eyre::Result<()> {
    if let Some(parent) = path.parent() {
        ensure_private_dir(parent)?;
    }
    if path.exists() && is_symlink(path)? {
        eyre::bail!("refusing to write to symlink: {}", path.display());
    }

    let tmp = tmp_path_for(path)?;
    let mut f = private_options()
        .create_new(true)
        .write(true)
        .open(&tmp)
        .with_context(|| format!("open temp {}", tmp.display()))?;
    let written = f
        .write_all(bytes)
        .and_then(|()| f.sync_all())
        .with_context(|| format!("write {}", tmp.display()));
    drop(f);
    if let Err(e) = written {
        drop(fs::remove_file(&tmp));
        return Err(e);
    }

    #[cfg(windows)]
    {
        if path.exists() {
            fs::remove_file(path).with_context(|| format!("remove existing {}", path.display()))?;
        }
    }

    fs::rename(&tmp, path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))
}

/// Contents of `path`, or `None` when it does not exist. Symlinks are refused.
pub fn read_private(path: &Path) -> eyre::Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    if is_symlink(path)? {
        eyre::bail!("refusing to read symlink: {}", path.display());
    }
    fs::read_to_string(path)
        .map(Some)
        .with_context(|| format!("read {}", path.display()))
}

/// Advisory exclusive lock held until drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
}

impl FileLock {
    /// Fail fast with `None` when another process holds the lock.
    pub fn try_acquire(path: &Path) -> eyre::Result<Option<Self>> {
        if let Some(parent) = path.parent() {
            ensure_private_dir(parent)?;
        }
        let file = private_options()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("open lock file {}", path.display()))?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(eyre::Report::new(e).wrap_err("lock exclusive")),
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        drop(fs2::FileExt::unlock(&self.file));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_replaces_contents() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let p = dir.path().join("nested").join("state.json");
        write_private_atomic(&p, b"one")?;
        write_private_atomic(&p, b"two")?;
        assert_eq!(read_private(&p)?.as_deref(), Some("two"));
        let leftovers = fs::read_dir(p.parent().ok_or_else(|| eyre::eyre!("parent"))?)?
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .count();
        assert_eq!(leftovers, 0);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn files_and_dirs_are_private() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let d = dir.path().join("data");
        let p = d.join("keyring.json");
        write_private_atomic(&p, b"{}")?;
        assert_eq!(fs::metadata(&p)?.permissions().mode() & 0o777, MODE_FILE_PRIVATE);
        assert_eq!(fs::metadata(&d)?.permissions().mode() & 0o777, MODE_DIR_PRIVATE);
        Ok(())
    }

    #[test]
    fn missing_file_reads_as_none() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        assert_eq!(read_private(&dir.path().join("absent"))?, None);
        Ok(())
    }

    #[test]
    fn lock_is_exclusive_until_dropped() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let p = dir.path().join("keyring.lock");
        let first = FileLock::try_acquire(&p)?;
        assert!(first.is_some());
        assert!(FileLock::try_acquire(&p)?.is_none());
        drop(first);
        assert!(FileLock::try_acquire(&p)?.is_some());
        Ok(())
    }
}
