use crate::data_structures::Store;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Temporary sibling written before the atomic rename
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Read a previously saved store. A missing file is not an error.
pub fn load(path: &Path) -> io::Result<Option<Store>> {
    if !path.exists() {
        debug!(?path, "No snapshot found");
        return Ok(None);
    }

    let content = fs::read(path)?;
    let store: Store = serde_json::from_slice(&content).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    info!(?path, size = content.len(), "Loaded snapshot");
    Ok(Some(store))
}

/// Write the store as JSON next to `path`, then rename over it
pub fn save(path: &Path, store: &Store) -> io::Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if !dir.exists() {
            fs::create_dir_all(dir)?;
            debug!(?dir, "Created snapshot directory");
        }
    }

    let content = serde_json::to_vec(store)?;
    let tmp = temp_path(path);
    fs::write(&tmp, &content)?;
    fs::rename(&tmp, path)?;
    debug!(?path, content_size = content.len(), "Saved snapshot");
    Ok(())
}
