//! Destination tree handling: validation, full copy, cleanup.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use ignore::WalkBuilder;
use log::{debug, warn};

use crate::error::{Result, ScanError};

/// Refuse a destination that is non-empty or lies inside the source root.
/// Returns whether the destination already existed.
pub fn prepare_destination(source_root: &Path, destination: &Path) -> Result<bool> {
    let root = source_root.canonicalize().map_err(|e| ScanError::TreeCopyFailure {
        path: source_root.to_path_buf(),
        source: e,
    })?;

    let existed = destination.exists();
    if existed {
        let mut entries = fs::read_dir(destination).map_err(|_| {
            ScanError::DestinationNotEmpty(destination.to_path_buf())
        })?;
        if entries.next().is_some() {
            return Err(ScanError::DestinationNotEmpty(destination.to_path_buf()));
        }
    }

    if resolve(destination)?.starts_with(&root) {
        return Err(ScanError::DestinationInsideSource {
            root,
            destination: destination.to_path_buf(),
        });
    }
    Ok(existed)
}

/// Absolute form of a path that may not exist yet: canonicalize the
/// deepest existing ancestor and append the rest.
fn resolve(path: &Path) -> Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    let mut existing = absolute.as_path();
    let mut rest = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                rest.push(name.to_os_string());
                existing = parent;
            }
            _ => break,
        }
    }
    let mut resolved = existing.canonicalize().unwrap_or_else(|_| existing.to_path_buf());
    for name in rest.into_iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}

/// Copy every file under `source_root` into `destination`, hidden and
/// ignored files included. Returns the number of files copied.
pub fn copy_tree(source_root: &Path, destination: &Path) -> Result<usize> {
    let fail = |path: &Path, source: io::Error| ScanError::TreeCopyFailure {
        path: path.to_path_buf(),
        source,
    };

    fs::create_dir_all(destination).map_err(|e| fail(destination, e))?;

    let walker = WalkBuilder::new(source_root).standard_filters(false).build();
    let mut copied = 0;
    for result in walker {
        let entry = result.map_err(|e| {
            let source = e
                .into_io_error()
                .unwrap_or_else(|| io::Error::other("walk failed"));
            fail(source_root, source)
        })?;
        let path = entry.path();
        let Ok(relative) = path.strip_prefix(source_root) else {
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }
        let target = destination.join(relative);

        match entry.file_type() {
            Some(t) if t.is_dir() => {
                fs::create_dir_all(&target).map_err(|e| fail(path, e))?;
            }
            Some(t) if t.is_file() => {
                copy_writable(path, &target).map_err(|e| fail(path, e))?;
                copied += 1;
            }
            _ if path.is_file() => {
                // Symlink to a file: copy the contents.
                copy_writable(path, &target).map_err(|e| fail(path, e))?;
                copied += 1;
            }
            _ => warn!("Not copying {}: not a regular file", path.display()),
        }
    }
    debug!("copied {} files into {}", copied, destination.display());
    Ok(copied)
}

/// Copy one file, leaving the copy writable by its owner even when the
/// source is read-only.
fn copy_writable(from: &Path, to: &Path) -> io::Result<()> {
    fs::copy(from, to)?;
    let mut perms = fs::metadata(to)?.permissions();
    if !perms.readonly() {
        return Ok(());
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        perms.set_mode(perms.mode() | 0o200);
    }
    #[cfg(not(unix))]
    perms.set_readonly(false);
    fs::set_permissions(to, perms)
}

/// Undo everything the engine created: the whole destination when it did
/// not exist before, otherwise just its contents.
pub fn cleanup_destination(destination: &Path, existed_before: bool) {
    let result = if existed_before {
        fs::read_dir(destination).and_then(|entries| {
            for entry in entries {
                let path = entry?.path();
                if path.is_dir() {
                    fs::remove_dir_all(&path)?;
                } else {
                    fs::remove_file(&path)?;
                }
            }
            Ok(())
        })
    } else {
        fs::remove_dir_all(destination)
    };
    if let Err(e) = result {
        warn!("Failed to clean up {}: {}", destination.display(), e);
    }
}

/// Map a recorded relative path onto a root, refusing anything that could
/// escape it.
pub fn contained_path(root: &Path, relative: &str) -> Option<PathBuf> {
    let mut out = root.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    (out != root).then_some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_includes_hidden_files() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let target = dst.path().join("copy");
        fs::create_dir_all(src.path().join("a/b")).unwrap();
        fs::write(src.path().join("a/b/page.html"), "<p>").unwrap();
        fs::write(src.path().join(".gitignore"), "*.html").unwrap();
        fs::write(src.path().join("logo.png"), [1u8, 2, 3]).unwrap();

        let copied = copy_tree(src.path(), &target).unwrap();
        assert_eq!(copied, 3);
        assert_eq!(fs::read_to_string(target.join("a/b/page.html")).unwrap(), "<p>");
        assert_eq!(fs::read(target.join("logo.png")).unwrap(), vec![1u8, 2, 3]);
    }

    #[cfg(unix)]
    #[test]
    fn test_read_only_source_copied_writable() {
        use std::os::unix::fs::PermissionsExt;

        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let target = dst.path().join("copy");
        let file = src.path().join("index.html");
        fs::write(&file, "<p>").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o444)).unwrap();

        copy_tree(src.path(), &target).unwrap();
        let copied = fs::metadata(target.join("index.html")).unwrap().permissions();
        assert!(!copied.readonly());
        assert_eq!(copied.mode() & 0o777, 0o644);
        assert_eq!(fs::metadata(&file).unwrap().permissions().mode() & 0o777, 0o444);
    }

    #[test]
    fn test_non_empty_destination_refused() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        fs::write(dst.path().join("keep.txt"), "x").unwrap();
        assert!(matches!(
            prepare_destination(src.path(), dst.path()),
            Err(ScanError::DestinationNotEmpty(_))
        ));
        assert_eq!(fs::read_to_string(dst.path().join("keep.txt")).unwrap(), "x");
    }

    #[test]
    fn test_destination_inside_source_refused() {
        let src = tempfile::tempdir().unwrap();
        let inside = src.path().join("out/refactored");
        assert!(matches!(
            prepare_destination(src.path(), &inside),
            Err(ScanError::DestinationInsideSource { .. })
        ));
    }

    #[test]
    fn test_empty_or_missing_destination_accepted() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        assert!(prepare_destination(src.path(), dst.path()).unwrap());
        assert!(!prepare_destination(src.path(), &dst.path().join("new")).unwrap());
    }

    #[test]
    fn test_cleanup_restores_prior_state() {
        let dst = tempfile::tempdir().unwrap();
        fs::create_dir_all(dst.path().join("x/y")).unwrap();
        fs::write(dst.path().join("x/y/z.html"), "z").unwrap();
        cleanup_destination(dst.path(), true);
        assert!(dst.path().exists());
        assert_eq!(fs::read_dir(dst.path()).unwrap().count(), 0);

        let fresh = dst.path().join("fresh");
        fs::create_dir_all(fresh.join("a")).unwrap();
        cleanup_destination(&fresh, false);
        assert!(!fresh.exists());
    }

    #[test]
    fn test_contained_path() {
        let root = Path::new("/dest");
        assert_eq!(contained_path(root, "a/b.html"), Some(PathBuf::from("/dest/a/b.html")));
        assert_eq!(contained_path(root, "../escape.html"), None);
        assert_eq!(contained_path(root, "/etc/passwd"), None);
        assert_eq!(contained_path(root, ""), None);
    }
}
