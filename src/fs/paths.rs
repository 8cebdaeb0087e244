//! Path algebra for canonical paths
//!
//! Pseudo file systems are full of symlinks that point across the tree, so
//! the scanners constantly need to answer "is this canonical path inside the
//! source root?" and "which components lie between these two paths?". Both
//! helpers operate on already-canonicalized input and use textual parent
//! reduction, so redundant separators behave the same way everywhere.

use std::ffi::OsString;
use std::path::Path;

/// Why [`split_relative`] rejected its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitError {
    /// `par` is not contained in `base` (EDOM in the errno taxonomy)
    NotContained,
    /// one of the paths is relative or otherwise malformed (EINVAL)
    Malformed,
}

/// Returns true when `needle` lives inside (or equals) `haystack`.
///
/// Both arguments must be canonical absolute paths. Containment is decided
/// by stepping `needle` back through its parents until the string lengths
/// meet, never by component iteration.
pub fn path_contains_canon(haystack: &Path, needle: &Path) -> bool {
    let hay_sz = haystack.as_os_str().len();
    let need_sz = needle.as_os_str().len();

    if need_sz == hay_sz {
        return needle == haystack;
    } else if need_sz < hay_sz {
        return false;
    }

    let mut c_need = needle;
    let mut sz = need_sz;
    while sz > hay_sz {
        match c_need.parent() {
            Some(p) => c_need = p,
            None => return false,
        }
        sz = c_need.as_os_str().len();
    }
    if sz < hay_sz {
        return false;
    }
    c_need == haystack
}

/// Splits `par` into the leaf components strictly below `base`.
///
/// `split_relative("/sys/class/net", "/sys")` yields `["class", "net"]`.
/// `par == base` yields an empty vector. Both paths must be absolute and
/// lexically normal.
pub fn split_relative(par: &Path, base: &Path) -> Result<Vec<OsString>, SplitError> {
    if !par.is_absolute() || !base.is_absolute() {
        return Err(SplitError::Malformed);
    }
    if !path_contains_canon(base, par) {
        return Err(SplitError::NotContained);
    }

    let mut comps = Vec::new();
    let mut cur = par;
    while cur != base {
        match (cur.file_name(), cur.parent()) {
            (Some(name), Some(parent)) => {
                comps.push(name.to_os_string());
                cur = parent;
            }
            // containment was already proven, so running out of parents
            // before reaching base means the input was not normal
            _ => return Err(SplitError::Malformed),
        }
    }
    comps.reverse();
    Ok(comps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_contains_basic() {
        let hay = PathBuf::from("/sys");
        assert!(path_contains_canon(&hay, Path::new("/sys")));
        assert!(path_contains_canon(&hay, Path::new("/sys/class")));
        assert!(path_contains_canon(&hay, Path::new("/sys/class/net/eth0")));
        assert!(!path_contains_canon(&hay, Path::new("/proc")));
        assert!(!path_contains_canon(&hay, Path::new("/")));
    }

    #[test]
    fn test_contains_rejects_sibling_prefix() {
        // "/sysfoo" starts with the same bytes but is a sibling, not a child
        assert!(!path_contains_canon(Path::new("/sys"), Path::new("/sysfoo")));
        assert!(!path_contains_canon(
            Path::new("/tmp/a"),
            Path::new("/tmp/ab/c")
        ));
    }

    #[test]
    fn test_contains_root_haystack() {
        assert!(path_contains_canon(Path::new("/"), Path::new("/anything/below")));
    }

    #[test]
    fn test_split_relative_basic() {
        let comps = split_relative(Path::new("/sys/class/net"), Path::new("/sys")).unwrap();
        assert_eq!(comps, vec![OsString::from("class"), OsString::from("net")]);
    }

    #[test]
    fn test_split_relative_equal_paths() {
        let comps = split_relative(Path::new("/sys"), Path::new("/sys")).unwrap();
        assert!(comps.is_empty());
    }

    #[test]
    fn test_split_relative_not_contained() {
        assert_eq!(
            split_relative(Path::new("/proc/1"), Path::new("/sys")),
            Err(SplitError::NotContained)
        );
    }

    #[test]
    fn test_split_relative_relative_input() {
        assert_eq!(
            split_relative(Path::new("sys/class"), Path::new("/sys")),
            Err(SplitError::Malformed)
        );
        assert_eq!(
            split_relative(Path::new("/sys/class"), Path::new("sys")),
            Err(SplitError::Malformed)
        );
    }
}
