//! Path helpers for configured locations.

use std::path::{Path, PathBuf};

/// Expand a leading `~` to the home directory.
///
/// Paths without `~`, or when no home directory is known, are returned as is.
pub fn expand_tilde(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

/// Resolve `path` against `base` unless it is already absolute.
pub fn resolve_against(path: impl AsRef<Path>, base: impl AsRef<Path>) -> PathBuf {
    let path = expand_tilde(path);
    if path.is_absolute() {
        path
    } else {
        base.as_ref().join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_tilde() {
        let expanded = expand_tilde("~/.vdrive/content");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expanded, home.join(".vdrive/content"));
        }
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
        assert_eq!(expand_tilde("rel/~x"), PathBuf::from("rel/~x"));
    }

    #[test]
    fn test_resolve_against() {
        assert_eq!(
            resolve_against("index", "/srv/vdrive"),
            PathBuf::from("/srv/vdrive/index")
        );
        assert_eq!(resolve_against("/tmp/x", "/srv"), PathBuf::from("/tmp/x"));
    }
}
