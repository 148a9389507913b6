use std::collections::BTreeMap;

use crate::svn;
use crate::svn::dump::{NodeAction, NodeKind, NodeStream, ReadError};

/// One row of the branches table: a path prefix mapped to a branch or tag
/// name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct BranchDef {
    pub(crate) is_tag: bool,
    pub(crate) prefix: Vec<u8>,
    pub(crate) name: String,
}

/// Parses the tab-separated branches table
/// (`kind \t final-rev \t date \t changes \t prefix \t name`); only the
/// kind, prefix and name fields are consumed. Rows with a blank prefix or
/// name are skipped. Duplicate prefixes, duplicate names and prefixes that
/// are ancestors of one another are counted as errors.
pub(crate) fn load(
    src: &mut dyn std::io::BufRead,
) -> Result<(Vec<BranchDef>, usize), std::io::Error> {
    let mut defs = Vec::<BranchDef>::new();
    let mut errors = 0_usize;

    let mut line = Vec::new();
    loop {
        line.clear();
        src.read_until(b'\n', &mut line)?;
        let ended = !line.ends_with(b"\n");

        let trimmed = line.trim_ascii_end();
        if !trimmed.is_empty() && !trimmed.starts_with(b"#") {
            let mut fields = trimmed.split(|&c| c == b'\t');
            let kind = fields.next().unwrap();
            let _final_rev = fields.next();
            let _date = fields.next();
            let _changes = fields.next();
            let prefix = fields.next().unwrap_or(b"");
            let name = fields.next().unwrap_or(b"");

            if !prefix.is_empty() && !name.is_empty() {
                let def = BranchDef {
                    is_tag: kind.starts_with(b"t"),
                    prefix: prefix.to_vec(),
                    name: String::from_utf8_lossy(name).into_owned(),
                };
                errors += check_conflicts(&defs, &def);
                defs.push(def);
            }
        }

        if ended {
            break;
        }
    }

    Ok((defs, errors))
}

fn check_conflicts(defs: &[BranchDef], new: &BranchDef) -> usize {
    let mut errors = 0;
    for existing in defs {
        if existing.prefix == new.prefix {
            tracing::warn!("branch prefix repeated: \"{}\"", new.prefix.escape_ascii());
            errors += 1;
            continue;
        }
        if existing.name == new.name {
            tracing::warn!(
                "branch name repeated: \"{}\" for \"{}\"",
                new.name,
                new.prefix.escape_ascii(),
            );
            errors += 1;
        }
        if svn::path::is_ancestor(&existing.prefix, &new.prefix)
            || svn::path::is_ancestor(&new.prefix, &existing.prefix)
        {
            tracing::warn!(
                "branch prefix \"{}\" conflicts with ancestor or descendant \"{}\"",
                new.prefix.escape_ascii(),
                existing.prefix.escape_ascii(),
            );
            errors += 1;
        }
    }
    errors
}

#[derive(Clone, Debug)]
pub(crate) struct BranchInfo {
    pub(crate) last_rev: u32,
    pub(crate) last_date: i64,
    pub(crate) changes: u64,
}

/// The "branches" command: detects branch-like prefixes from the dump.
///
/// Nodes that are not deletions and either touch a file or copy a directory
/// contribute their (parent) directory. A prefix seen nested below an
/// earlier one collapses into it; deeper entries are dropped when a shorter
/// prefix appears. Each revision counts one change per prefix.
pub(crate) fn scan_branches(
    stream: &mut NodeStream<'_>,
) -> Result<BTreeMap<Vec<u8>, BranchInfo>, ReadError> {
    let mut branches = BTreeMap::<Vec<u8>, BranchInfo>::new();

    while let Some(node) = stream.next_node()? {
        if node.action == NodeAction::Delete {
            continue;
        }
        if node.kind != Some(NodeKind::File) && !node.has_copy_from() {
            continue;
        }

        let dir = if node.kind == Some(NodeKind::Dir) {
            node.path.as_slice()
        } else {
            svn::path::parent(&node.path).unwrap_or(b"")
        };
        if dir.is_empty() {
            continue;
        }

        apply_action(&mut branches, node.rev, node.meta.date, dir);
    }

    Ok(branches)
}

fn apply_action(branches: &mut BTreeMap<Vec<u8>, BranchInfo>, rev: u32, date: i64, dir: &[u8]) {
    let key = if branches.contains_key(dir) {
        dir.to_vec()
    } else {
        // a shorter prefix subsumes any deeper ones recorded earlier
        let nested = branches
            .keys()
            .filter(|key| svn::path::is_ancestor(dir, key))
            .cloned()
            .collect::<Vec<_>>();
        for key in nested {
            branches.remove(&key);
        }

        match branches
            .keys()
            .find(|key| svn::path::is_ancestor(key, dir))
            .cloned()
        {
            Some(ancestor) => ancestor,
            None => {
                branches.insert(
                    dir.to_vec(),
                    BranchInfo {
                        last_rev: 0,
                        last_date: 0,
                        changes: 0,
                    },
                );
                dir.to_vec()
            }
        }
    };

    let info = branches.get_mut(&key).unwrap();
    if info.last_rev != rev {
        info.last_rev = rev;
        info.last_date = date;
        info.changes += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::{apply_action, load};
    use std::collections::BTreeMap;

    #[test]
    fn load_consumes_kind_prefix_and_name() {
        let table = b"# kind\tfinal-rev\tdate\tchanges\tprefix\tname\n\
            branch\t10\t2011-01-01\t5\ttrunk\tmaster\n\
            t\t12\t2011-02-01\t1\ttags/v1.0\tv1.0\n\
            branch\t\t\t\t\t\n";
        let (defs, errors) = load(&mut table.as_slice()).unwrap();
        assert_eq!(errors, 0);
        assert_eq!(defs.len(), 2);
        assert!(!defs[0].is_tag);
        assert_eq!(defs[0].prefix, b"trunk");
        assert_eq!(defs[0].name, "master");
        assert!(defs[1].is_tag);
        assert_eq!(defs[1].name, "v1.0");
    }

    #[test]
    fn load_reports_conflicts() {
        let table = b"branch\t1\td\t1\ttrunk\tmaster\n\
            branch\t1\td\t1\ttrunk\tother\n\
            branch\t1\td\t1\tbranches/a\tmaster\n\
            branch\t1\td\t1\tbranches/a/nested\tnested\n";
        let (defs, errors) = load(&mut table.as_slice()).unwrap();
        assert_eq!(defs.len(), 4);
        // duplicate prefix, duplicate name, ancestor conflict
        assert_eq!(errors, 3);
    }

    #[test]
    fn scanner_collapses_nested_prefixes() {
        let mut branches = BTreeMap::new();
        apply_action(&mut branches, 1, 100, b"trunk/src");
        apply_action(&mut branches, 2, 200, b"trunk");
        // the shorter prefix replaced the deeper one
        assert_eq!(branches.len(), 1);
        assert!(branches.contains_key(b"trunk".as_slice()));

        // a deeper path maps onto the existing prefix
        apply_action(&mut branches, 3, 300, b"trunk/doc");
        assert_eq!(branches.len(), 1);
        let info = &branches[b"trunk".as_slice()];
        assert_eq!(info.last_rev, 3);
        assert_eq!(info.changes, 2);
    }

    #[test]
    fn scanner_counts_once_per_revision() {
        let mut branches = BTreeMap::new();
        apply_action(&mut branches, 1, 100, b"trunk");
        apply_action(&mut branches, 1, 100, b"trunk");
        assert_eq!(branches[b"trunk".as_slice()].changes, 1);
    }
}
