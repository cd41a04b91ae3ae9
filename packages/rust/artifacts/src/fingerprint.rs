//! Streaming content hashing and read-only locking of finished artifacts.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::debug;

use folio_shared::{FolioError, Result};

/// Files are hashed in blocks of this many bytes.
const BLOCK_SIZE: usize = 8 * 1024;

/// Hex SHA-256 of the file at `path`, read block by block.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| FolioError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; BLOCK_SIZE];

    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(FolioError::io(path, e)),
        };
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Hex SHA-256 of an in-memory buffer.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Remove every write permission bit. No-op if already locked.
pub fn lock(path: &Path) -> Result<()> {
    let mut perms = std::fs::metadata(path)
        .map_err(|e| FolioError::io(path, e))?
        .permissions();
    if perms.readonly() {
        return Ok(());
    }
    perms.set_readonly(true);
    std::fs::set_permissions(path, perms).map_err(|e| FolioError::io(path, e))?;
    debug!(path = %path.display(), "locked artifact");
    Ok(())
}

/// Restore owner write permission. No-op if already writable.
pub fn unlock(path: &Path) -> Result<()> {
    let mut perms = std::fs::metadata(path)
        .map_err(|e| FolioError::io(path, e))?
        .permissions();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = perms.mode();
        if mode & 0o200 != 0 {
            return Ok(());
        }
        perms.set_mode(mode | 0o200);
    }
    #[cfg(not(unix))]
    {
        if !perms.readonly() {
            return Ok(());
        }
        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(false);
    }

    std::fs::set_permissions(path, perms).map_err(|e| FolioError::io(path, e))?;
    debug!(path = %path.display(), "unlocked artifact");
    Ok(())
}

/// Whether no write permission bit is set on `path`.
pub fn is_locked(path: &Path) -> Result<bool> {
    let meta = std::fs::metadata(path).map_err(|e| FolioError::io(path, e))?;
    Ok(meta.permissions().readonly())
}
