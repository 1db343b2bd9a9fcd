use crate::config::types::{BootError, Result};
use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

/// Summary of a source tree copy
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CopyStats {
    pub files: u64,
    pub directories: u64,
    pub symlinks: u64,
    pub bytes: u64,
}

/// Recursively copy `source` into `dest`, overwriting files that exist.
///
/// Paths listed in `skip` (absolute, compared after canonicalization of
/// `source`) are not descended into. Symlinks are recreated as links, never
/// followed.
pub fn copy_tree(source: &Path, dest: &Path, skip: &[PathBuf]) -> Result<CopyStats> {
    let source = source.canonicalize().map_err(|e| {
        BootError::Layout(format!(
            "Source directory {} is not accessible: {}",
            source.display(),
            e
        ))
    })?;
    if !source.is_dir() {
        return Err(BootError::Layout(format!(
            "Source path {} is not a directory",
            source.display()
        )));
    }

    fs::create_dir_all(dest)?;
    let skip: Vec<PathBuf> = skip
        .iter()
        .map(|p| p.canonicalize().unwrap_or_else(|_| p.clone()))
        .collect();

    let mut stats = CopyStats::default();
    copy_dir(&source, dest, &skip, &mut stats)?;

    log::info!(
        "Copied {} file(s), {} dir(s), {} symlink(s) ({} bytes) from {} to {}",
        stats.files,
        stats.directories,
        stats.symlinks,
        stats.bytes,
        source.display(),
        dest.display()
    );
    Ok(stats)
}

fn copy_dir(source: &Path, dest: &Path, skip: &[PathBuf], stats: &mut CopyStats) -> Result<()> {
    let mut entries = fs::read_dir(source)?.collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let from = entry.path();
        if skip.iter().any(|s| s == &from) {
            log::debug!("Skipping {}", from.display());
            continue;
        }

        let to = dest.join(entry.file_name());
        let file_type = entry.file_type()?;

        if file_type.is_symlink() {
            let link_target = fs::read_link(&from)?;
            remove_existing(&to)?;
            symlink(&link_target, &to)?;
            stats.symlinks += 1;
        } else if file_type.is_dir() {
            if to.is_file() || to.is_symlink() {
                fs::remove_file(&to)?;
            }
            fs::create_dir_all(&to)?;
            stats.directories += 1;
            copy_dir(&from, &to, skip, stats)?;
        } else if file_type.is_file() {
            remove_existing(&to)?;
            stats.bytes += fs::copy(&from, &to)?;
            stats.files += 1;
        } else {
            log::warn!("Skipping special file {}", from.display());
        }
    }

    Ok(())
}

/// Remove a file or link at `path` so it can be replaced even if read-only
fn remove_existing(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => Err(BootError::Layout(format!(
            "Cannot replace directory {} with a file",
            path.display()
        ))),
        Ok(_) => Ok(fs::remove_file(path)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn copies_nested_tree_with_modes_and_links() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("context");
        fs::create_dir_all(src.join("src/blockserver")).unwrap();
        fs::write(src.join("src/blockserver/server.py"), "print('hi')\n").unwrap();
        fs::write(src.join("entrypoint.sh"), "#!/bin/sh\n").unwrap();
        fs::set_permissions(src.join("entrypoint.sh"), fs::Permissions::from_mode(0o755)).unwrap();
        symlink("src/blockserver/server.py", src.join("server.py")).unwrap();

        let dest = dir.path().join("image");
        let stats = copy_tree(&src, &dest, &[]).unwrap();

        assert_eq!(stats.files, 2);
        assert_eq!(stats.symlinks, 1);
        assert_eq!(
            fs::read_to_string(dest.join("src/blockserver/server.py")).unwrap(),
            "print('hi')\n"
        );
        let mode = fs::metadata(dest.join("entrypoint.sh")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        assert_eq!(
            fs::read_link(dest.join("server.py")).unwrap(),
            PathBuf::from("src/blockserver/server.py")
        );
    }

    #[test]
    fn nested_destination_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().to_path_buf();
        fs::write(src.join("app.py"), "x").unwrap();
        let dest = src.join("image");
        fs::create_dir_all(&dest).unwrap();

        let stats = copy_tree(&src, &dest, &[dest.clone()]).unwrap();
        assert_eq!(stats.files, 1);
        assert!(!dest.join("image").exists());
    }

    #[test]
    fn overwrites_read_only_files_from_previous_build() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("context");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("qabel.yaml"), "new").unwrap();

        let dest = dir.path().join("image");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("qabel.yaml"), "old").unwrap();
        fs::set_permissions(dest.join("qabel.yaml"), fs::Permissions::from_mode(0o444)).unwrap();

        copy_tree(&src, &dest, &[]).unwrap();
        assert_eq!(fs::read_to_string(dest.join("qabel.yaml")).unwrap(), "new");
    }

    #[test]
    fn missing_source_is_a_layout_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = copy_tree(&dir.path().join("nope"), &dir.path().join("image"), &[]).unwrap_err();
        assert!(matches!(err, BootError::Layout(_)));
    }
}
