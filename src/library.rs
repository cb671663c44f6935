use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::downloader::ArtifactKind;
use crate::error::{Error, Result};

/// Ids with an installed patch in any of `dirs`, sorted and unique.
/// Unreadable directories are skipped.
pub async fn installed_ids(dirs: &[PathBuf]) -> Vec<String> {
    let mut ids = BTreeSet::new();

    for dir in dirs {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                log::debug!("Skipping {}: {}", dir.display(), e);
                continue;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    log::debug!("Stopped reading {}: {}", dir.display(), e);
                    break;
                }
            };
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("lua") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if !stem.is_empty() && stem.chars().all(|c| c.is_ascii_digit()) {
                    ids.insert(stem.to_string());
                }
            }
        }
    }

    ids.into_iter().collect()
}

/// Delete the installed patch for `id` from every directory. True if at least
/// one file was removed.
pub async fn remove_installed(id: &str, dirs: &[PathBuf]) -> Result<bool> {
    let file_name = ArtifactKind::Patch.file_name(id);
    let mut removed = false;
    let mut last_error = None;

    for dir in dirs {
        let path = dir.join(&file_name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                log::info!("Removed {}", path.display());
                removed = true;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                log::warn!("Could not remove {}: {}", path.display(), e);
                last_error = Some(Error::fs(path, e));
            }
        }
    }

    match (removed, last_error) {
        (false, Some(e)) => Err(e),
        _ => Ok(removed),
    }
}
