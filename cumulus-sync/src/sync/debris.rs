//! Local debris: files removed cloud-side are parked under
//! `<root>/<debris>/<YYYY-MM-DD>/` instead of being unlinked.

use std::path::Path;

use time::OffsetDateTime;
use time::macros::format_description;
use tracing::debug;

use cumulus_core::fs::{self, FsError};
use cumulus_core::paths::leaf_name;

/// Renames `local_path` into the dated debris folder. Returns Ok(false) when
/// a transient error means the caller should retry later; permanent errors
/// surface. If the daily folder cannot be used, per-second suffixed variants
/// (`YYYY-MM-DD HH.MM.SS.NN`) are tried, up to 100 in all.
pub fn move_to_local_debris(
    local_path: &Path,
    local_debris: &Path,
    now: OffsetDateTime,
) -> Result<bool, FsError> {
    let day_format = format_description!("[year]-[month]-[day]");
    let time_format = format_description!("[hour].[minute].[second]");
    let day = now
        .format(&day_format)
        .unwrap_or_else(|_| "0000-00-00".to_string());
    let seconds = now
        .format(&time_format)
        .unwrap_or_else(|_| "00.00.00".to_string());

    let leaf = match local_path.file_name().and_then(|n| n.to_str()) {
        Some(leaf) => leaf.to_string(),
        None => leaf_name(&local_path.to_string_lossy()).to_string(),
    };

    let mut have_dir = false;
    for attempt in -3i32..100 {
        if attempt == -2 || attempt > 95 {
            debug!(debris = %local_debris.display(), "creating local debris folder");
            let _ = fs::mkdir(local_debris, true);
        }

        let folder = if attempt >= 0 {
            format!("{day} {seconds}.{attempt:02}")
        } else {
            day.clone()
        };
        let daily = local_debris.join(&folder);

        if attempt > -3 {
            have_dir = match fs::mkdir(&daily, false) {
                Ok(()) => true,
                Err(FsError::Permanent { source, .. })
                    if source.kind() == std::io::ErrorKind::AlreadyExists =>
                {
                    true
                }
                Err(_) => false,
            };
        }

        let target = daily.join(&leaf);
        match fs::rename(local_path, &target, false) {
            Ok(()) => return Ok(true),
            Err(err) if err.is_transient() => return Ok(false),
            Err(FsError::Permanent { source, .. })
                if source.kind() == std::io::ErrorKind::AlreadyExists =>
            {
                // target name taken; fall through to a suffixed variant
            }
            Err(err) => {
                if have_dir {
                    return Err(err);
                }
                // daily folder is probably missing; the next iteration
                // creates it
            }
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn moves_file_into_dated_folder() {
        let dir = tempfile::tempdir().unwrap();
        let debris = dir.path().join(".debris");
        let victim = dir.path().join("old.txt");
        std::fs::write(&victim, b"bytes").unwrap();

        let moved =
            move_to_local_debris(&victim, &debris, datetime!(2026-08-02 10:30:00 UTC)).unwrap();

        assert!(moved);
        assert!(!victim.exists());
        let parked = debris.join("2026-08-02").join("old.txt");
        assert_eq!(std::fs::read(parked).unwrap(), b"bytes");
    }

    #[test]
    fn falls_back_to_suffixed_folder_when_name_is_taken() {
        let dir = tempfile::tempdir().unwrap();
        let debris = dir.path().join(".debris");
        let daily = debris.join("2026-08-02");
        std::fs::create_dir_all(&daily).unwrap();
        // same leaf already parked today
        std::fs::write(daily.join("old.txt"), b"earlier").unwrap();

        let victim = dir.path().join("old.txt");
        std::fs::write(&victim, b"later").unwrap();

        let moved =
            move_to_local_debris(&victim, &debris, datetime!(2026-08-02 10:30:00 UTC)).unwrap();

        assert!(moved);
        assert!(!victim.exists());
        let suffixed = debris.join("2026-08-02 10.30.00.00").join("old.txt");
        assert_eq!(std::fs::read(suffixed).unwrap(), b"later");
        assert_eq!(std::fs::read(daily.join("old.txt")).unwrap(), b"earlier");
    }

    #[test]
    fn folders_are_parked_whole() {
        let dir = tempfile::tempdir().unwrap();
        let debris = dir.path().join(".debris");
        let victim = dir.path().join("Project");
        std::fs::create_dir_all(victim.join("sub")).unwrap();
        std::fs::write(victim.join("sub/f.txt"), b"f").unwrap();

        let moved =
            move_to_local_debris(&victim, &debris, datetime!(2026-08-02 00:00:00 UTC)).unwrap();

        assert!(moved);
        assert!(
            debris
                .join("2026-08-02")
                .join("Project")
                .join("sub/f.txt")
                .exists()
        );
    }
}
