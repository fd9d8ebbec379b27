//! Access to the served root: listing and traversal-safe name resolution.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Names of the regular files directly under `root`, sorted.
///
/// Names that would break line framing are skipped.
pub fn list_root(root: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        // follow symlinks; where they point is checked again on download
        let is_file = fs::metadata(entry.path()).map(|m| m.is_file()).unwrap_or(false);
        if !is_file {
            continue;
        }
        // a non-UTF-8 name could not be asked for again
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name.contains(['\n', '\r']) {
            continue;
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}

/// Resolve a client-supplied name to a regular file under `root`.
///
/// `root` must already be canonical. The name is first normalized
/// lexically, so `..` can never climb above the root, then canonicalized so
/// symlinks pointing outside the root are caught as well.
pub fn resolve_under_root(root: &Path, name: &str) -> Result<PathBuf> {
    let mut joined = root.to_path_buf();
    let mut depth = 0usize;
    for comp in Path::new(name).components() {
        match comp {
            Component::Normal(s) => {
                // Windows ADS defense: reject ':' in path components
                #[cfg(windows)]
                if s.to_string_lossy().contains(':') {
                    return Err(Error::SecurityViolation(name.to_string()));
                }
                joined.push(s);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return Err(Error::SecurityViolation(name.to_string()));
                }
                joined.pop();
                depth -= 1;
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(Error::SecurityViolation(name.to_string()));
            }
        }
    }
    if depth == 0 {
        return Err(Error::NotFound(name.to_string()));
    }

    let canon = match fs::canonicalize(&joined) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(Error::NotFound(name.to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    if !canon.starts_with(root) {
        return Err(Error::SecurityViolation(name.to_string()));
    }
    if !canon.is_file() {
        return Err(Error::NotFound(name.to_string()));
    }
    Ok(canon)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root_with_files() -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(tmp.path()).unwrap();
        fs::write(root.join("b.txt"), b"bee").unwrap();
        fs::write(root.join("a.bin"), b"ay").unwrap();
        fs::create_dir(root.join("sub")).unwrap();
        fs::write(root.join("sub/inner.txt"), b"in").unwrap();
        (tmp, root)
    }

    #[test]
    fn lists_files_only_sorted() {
        let (_tmp, root) = root_with_files();
        assert_eq!(list_root(&root).unwrap(), vec!["a.bin", "b.txt"]);
        assert_eq!(list_root(&root).unwrap(), list_root(&root).unwrap());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn skips_names_that_cannot_be_requested() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let (_tmp, root) = root_with_files();
        fs::write(root.join(OsStr::from_bytes(b"raw\xff.bin")), b"x").unwrap();
        fs::write(root.join("two\nlines"), b"x").unwrap();
        assert_eq!(list_root(&root).unwrap(), vec!["a.bin", "b.txt"]);
    }

    #[test]
    fn listing_missing_root_fails() {
        let (_tmp, root) = root_with_files();
        assert!(list_root(&root.join("nope")).is_err());
    }

    #[test]
    fn resolves_plain_and_nested_names() {
        let (_tmp, root) = root_with_files();
        assert_eq!(resolve_under_root(&root, "a.bin").unwrap(), root.join("a.bin"));
        assert_eq!(
            resolve_under_root(&root, "sub/../b.txt").unwrap(),
            root.join("b.txt")
        );
        assert_eq!(
            resolve_under_root(&root, "./sub/inner.txt").unwrap(),
            root.join("sub/inner.txt")
        );
    }

    #[test]
    fn traversal_is_a_security_violation() {
        let (_tmp, root) = root_with_files();
        for bad in ["../etc/passwd", "sub/../../x", "/etc/passwd", ".."] {
            assert!(
                matches!(resolve_under_root(&root, bad), Err(Error::SecurityViolation(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn missing_and_directories_are_not_found() {
        let (_tmp, root) = root_with_files();
        assert!(matches!(resolve_under_root(&root, "ghost.bin"), Err(Error::NotFound(_))));
        assert!(matches!(resolve_under_root(&root, "sub"), Err(Error::NotFound(_))));
        assert!(matches!(resolve_under_root(&root, "."), Err(Error::NotFound(_))));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_out_of_root_is_rejected() {
        let (_tmp, root) = root_with_files();
        let outside = tempfile::tempdir().unwrap();
        let secret = outside.path().join("secret");
        fs::write(&secret, b"s").unwrap();
        std::os::unix::fs::symlink(&secret, root.join("link")).unwrap();
        assert!(matches!(
            resolve_under_root(&root, "link"),
            Err(Error::SecurityViolation(_))
        ));
    }
}
