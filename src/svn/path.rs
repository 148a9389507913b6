//! Subversion paths are byte strings whose segments are separated by `/`.
//! They never start or end with a separator; the empty path addresses the
//! repository root.

/// Splits a path into its segments. The empty path yields no segments.
pub(crate) fn segments(path: &[u8]) -> impl DoubleEndedIterator<Item = &[u8]> {
    path.split(|&c| c == b'/').filter(|s| !s.is_empty())
}

/// Last segment of a path, i.e. the file or directory name.
pub(crate) fn file_name(path: &[u8]) -> &[u8] {
    path.iter()
        .rposition(|&c| c == b'/')
        .map_or(path, |i| &path[(i + 1)..])
}

/// Parent of a path; `None` for the empty path and for single-segment paths.
pub(crate) fn parent(path: &[u8]) -> Option<&[u8]> {
    if path.is_empty() {
        return None;
    }
    Some(
        path.iter()
            .rposition(|&c| c == b'/')
            .map_or(b"".as_slice(), |i| &path[..i]),
    )
}

/// Walks `path`, then its parent, then the grandparent, down to the first
/// segment. The empty path is never yielded. Deepest-prefix lookups walk
/// this chain and stop at the first registered entry.
pub(crate) fn self_and_ancestors(path: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut current = if path.is_empty() { None } else { Some(path) };
    std::iter::from_fn(move || {
        let this = current?;
        current = parent(this).filter(|p| !p.is_empty());
        Some(this)
    })
}

/// `true` iff `prefix` is a proper ancestor of `path` (segment-wise, so
/// `tru` is not an ancestor of `trunk`).
pub(crate) fn is_ancestor(prefix: &[u8], path: &[u8]) -> bool {
    path.len() > prefix.len()
        && path.starts_with(prefix)
        && path[prefix.len()] == b'/'
}

/// Strips `prefix` from `path`. Returns the empty path when both are equal
/// and `None` when `prefix` is not an ancestor.
pub(crate) fn strip_prefix<'a>(prefix: &[u8], path: &'a [u8]) -> Option<&'a [u8]> {
    if path == prefix {
        Some(b"")
    } else if is_ancestor(prefix, path) {
        Some(&path[(prefix.len() + 1)..])
    } else {
        None
    }
}

/// Joins two paths, either of which may be empty.
pub(crate) fn join(base: &[u8], rest: &[u8]) -> Vec<u8> {
    if base.is_empty() {
        rest.to_vec()
    } else if rest.is_empty() {
        base.to_vec()
    } else {
        let mut out = Vec::with_capacity(base.len() + rest.len() + 1);
        out.extend(base);
        out.push(b'/');
        out.extend(rest);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::{file_name, is_ancestor, join, parent, segments, self_and_ancestors, strip_prefix};

    #[test]
    fn test_segments() {
        assert_eq!(segments(b"").count(), 0);
        assert_eq!(segments(b"a").collect::<Vec<_>>(), [b"a"]);
        assert_eq!(
            segments(b"a/b/c").collect::<Vec<_>>(),
            [b"a".as_slice(), b"b", b"c"],
        );
    }

    #[test]
    fn test_file_name_and_parent() {
        assert_eq!(file_name(b"trunk/src/main.c"), b"main.c");
        assert_eq!(file_name(b"trunk"), b"trunk");
        assert_eq!(parent(b"trunk/src/main.c"), Some(b"trunk/src".as_slice()));
        assert_eq!(parent(b"trunk"), Some(b"".as_slice()));
        assert_eq!(parent(b""), None);
    }

    #[test]
    fn test_ancestors() {
        let chain = self_and_ancestors(b"a/b/c").collect::<Vec<_>>();
        assert_eq!(chain, [b"a/b/c".as_slice(), b"a/b", b"a"]);
        assert_eq!(self_and_ancestors(b"").count(), 0);
    }

    #[test]
    fn test_prefixes() {
        assert!(is_ancestor(b"trunk", b"trunk/a.c"));
        assert!(!is_ancestor(b"tru", b"trunk/a.c"));
        assert!(!is_ancestor(b"trunk", b"trunk"));
        assert_eq!(strip_prefix(b"trunk", b"trunk/a.c"), Some(b"a.c".as_slice()));
        assert_eq!(strip_prefix(b"trunk", b"trunk"), Some(b"".as_slice()));
        assert_eq!(strip_prefix(b"branches", b"trunk/a.c"), None);
        assert_eq!(join(b"mod", b"a/b"), b"mod/a/b");
        assert_eq!(join(b"", b"a"), b"a");
        assert_eq!(join(b"mod", b""), b"mod");
    }
}
