use std::collections::BTreeMap;

use crate::svn::dump::{NodeStream, ReadError};
use crate::FHashMap;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct AuthorInfo {
    pub(crate) name: String,
    pub(crate) email: String,
}

/// The authors table: SVN author id to git identity.
pub(crate) struct Authors {
    map: FHashMap<Vec<u8>, AuthorInfo>,
}

impl Authors {
    pub(crate) fn new() -> Self {
        Self {
            map: FHashMap::default(),
        }
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub(crate) fn get(&self, id: &[u8]) -> Option<&AuthorInfo> {
        self.map.get(id)
    }

    /// Registers an author; the first entry for an id wins. Returns whether
    /// the id was new.
    pub(crate) fn insert(&mut self, id: Vec<u8>, name: &str, email: &str) -> bool {
        match self.map.entry(id) {
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(AuthorInfo {
                    name: name.into(),
                    email: email.into(),
                });
                true
            }
            std::collections::hash_map::Entry::Occupied(_) => false,
        }
    }

    /// Parses the tab-separated authors table (`id \t name \t email`).
    /// Lines starting with `#` are comments. Returns the table together
    /// with the number of problems found; the caller decides whether to
    /// proceed.
    pub(crate) fn load(src: &mut dyn std::io::BufRead) -> Result<(Self, usize), std::io::Error> {
        let mut authors = Self::new();
        let mut errors = 0_usize;

        let mut line = Vec::new();
        loop {
            line.clear();
            src.read_until(b'\n', &mut line)?;
            let ended = !line.ends_with(b"\n");

            let trimmed = line.trim_ascii_end();
            if !trimmed.is_empty() && !trimmed.starts_with(b"#") {
                let mut fields = trimmed.split(|&c| c == b'\t');
                let id = fields.next().unwrap().to_vec();

                let mut name = fields
                    .next()
                    .map(|raw| unescape_string(raw))
                    .unwrap_or_default();
                if name == "Unknown" {
                    name = String::from_utf8_lossy(&id).into_owned();
                }

                let email = fields
                    .next()
                    .map(|raw| unescape_string(raw))
                    .unwrap_or_else(|| "unknown@unknown.org".into());

                if !authors.insert(id.clone(), &name, &email) {
                    tracing::warn!("author id repeated: {}", id.escape_ascii());
                    errors += 1;
                }
            }

            if ended {
                break;
            }
        }

        Ok((authors, errors))
    }
}

/// Undoes the table's email escaping: `<>` stands for `@` and `~` for `.`.
fn unescape_string(raw: &[u8]) -> String {
    let mut out = Vec::with_capacity(raw.len());
    let mut rem = raw;
    while let Some((&c, rest)) = rem.split_first() {
        if c == b'<' && rest.first() == Some(&b'>') {
            out.push(b'@');
            rem = &rest[1..];
        } else if c == b'~' {
            out.push(b'.');
            rem = rest;
        } else {
            out.push(c);
            rem = rest;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// The "authors" command: author id frequency over the dump, counting each
/// revision once.
pub(crate) fn scan_authors(
    stream: &mut NodeStream<'_>,
) -> Result<BTreeMap<Vec<u8>, u64>, ReadError> {
    let mut counts = BTreeMap::new();
    let mut last_rev = None;
    while let Some(node) = stream.next_node()? {
        if last_rev != Some(node.rev) {
            last_rev = Some(node.rev);
            if !node.meta.author.is_empty() {
                *counts.entry(node.meta.author.clone()).or_insert(0) += 1;
            }
        }
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::{unescape_string, Authors};

    #[test]
    fn test_unescape_string() {
        assert_eq!(unescape_string(b"johnw<>example~com"), "johnw@example.com");
        assert_eq!(unescape_string(b"plain"), "plain");
        assert_eq!(unescape_string(b"a~b~c"), "a.b.c");
        assert_eq!(unescape_string(b"<solo"), "<solo");
    }

    #[test]
    fn load_parses_and_unescapes() {
        let table = b"# comment line\n\
            johnw\tJohn Wiegley\tjohnw<>boostpro~com\n\
            ghost\tUnknown\tghost<>example~org\n\
            noaddr\tNo Address\n";
        let (authors, errors) = Authors::load(&mut table.as_slice()).unwrap();
        assert_eq!(errors, 0);

        let johnw = authors.get(b"johnw").unwrap();
        assert_eq!(johnw.name, "John Wiegley");
        assert_eq!(johnw.email, "johnw@boostpro.com");

        // "Unknown" collapses to the author id, preserved verbatim
        assert_eq!(authors.get(b"ghost").unwrap().name, "ghost");

        // missing email field substitutes the placeholder
        assert_eq!(authors.get(b"noaddr").unwrap().email, "unknown@unknown.org");
    }

    #[test]
    fn duplicate_ids_are_counted() {
        let table = b"a\tFirst\ta<>x~y\na\tSecond\ta<>x~y\n";
        let (authors, errors) = Authors::load(&mut table.as_slice()).unwrap();
        assert_eq!(errors, 1);
        assert!(!authors.is_empty());
    }
}
