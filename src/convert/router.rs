use crate::svn;
use crate::FHashMap;

/// Index of a submodule in the converter's submodule list.
pub(crate) type ModuleId = usize;

/// Maps source paths into submodule repositories.
///
/// Each configured submodule registers one or more source prefixes; a path
/// matching a prefix (deepest first) is rewritten into the submodule's own
/// namespace and mirrored into that repository. A prefix mapped to `None`
/// (`<ignore>` target) excludes its paths from submodule routing.
pub(crate) struct Router {
    sources: FHashMap<Vec<u8>, (ModuleId, Option<Vec<u8>>)>,
}

impl Router {
    pub(crate) fn new() -> Self {
        Self {
            sources: FHashMap::default(),
        }
    }

    /// Registers a source prefix. Returns `false` when the prefix was
    /// already mapped (reported by the loader as a config error).
    pub(crate) fn add_source(
        &mut self,
        source: Vec<u8>,
        module: ModuleId,
        target: Option<Vec<u8>>,
    ) -> bool {
        match self.sources.entry(source) {
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert((module, target));
                true
            }
            std::collections::hash_map::Entry::Occupied(_) => false,
        }
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// The submodule a path belongs to, with the path rewritten into the
    /// submodule's tree. `None` when no prefix matches or the deepest
    /// matching prefix is ignored.
    pub(crate) fn route(&self, path: &[u8]) -> Option<(ModuleId, Vec<u8>)> {
        if self.sources.is_empty() {
            return None;
        }
        for ancestor in svn::path::self_and_ancestors(path) {
            if let Some((module, target)) = self.sources.get(ancestor) {
                let target = target.as_deref()?;
                let suffix = svn::path::strip_prefix(ancestor, path).unwrap();
                return Some((*module, svn::path::join(target, suffix)));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::Router;

    #[test]
    fn rewrites_into_module_namespace() {
        let mut router = Router::new();
        assert!(router.add_source(b"trunk/lib".to_vec(), 0, Some(b"src".to_vec())));
        assert!(router.add_source(b"trunk/doc".to_vec(), 1, Some(b"".to_vec())));

        assert_eq!(
            router.route(b"trunk/lib/util.c"),
            Some((0, b"src/util.c".to_vec())),
        );
        // "." target maps to the module root
        assert_eq!(router.route(b"trunk/doc/readme"), Some((1, b"readme".to_vec())));
        // prefix itself maps to the target
        assert_eq!(router.route(b"trunk/lib"), Some((0, b"src".to_vec())));
        assert_eq!(router.route(b"trunk/other/file"), None);
    }

    #[test]
    fn ignored_prefixes_discard_matches() {
        let mut router = Router::new();
        assert!(router.add_source(b"trunk/lib".to_vec(), 0, Some(b"src".to_vec())));
        assert!(router.add_source(b"trunk/lib/vendored".to_vec(), 0, None));

        // the deepest prefix is ignored, so the path is not routed at all
        assert_eq!(router.route(b"trunk/lib/vendored/x.c"), None);
        assert_eq!(
            router.route(b"trunk/lib/own.c"),
            Some((0, b"src/own.c".to_vec())),
        );
    }

    #[test]
    fn duplicate_source_is_rejected() {
        let mut router = Router::new();
        assert!(router.add_source(b"trunk/lib".to_vec(), 0, Some(b"a".to_vec())));
        assert!(!router.add_source(b"trunk/lib".to_vec(), 1, Some(b"b".to_vec())));
    }
}
