use std::collections::HashMap;
use std::io::Read as _;
use std::rc::Rc;

// SVN dump file format described in
// https://svn.apache.org/repos/asf/subversion/trunk/notes/dump-load-format.txt

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum DumpVersion {
    Two,
    Three,
}

impl DumpVersion {
    fn parse(s: &[u8]) -> Option<Self> {
        match s {
            b"2" => Some(Self::Two),
            b"3" => Some(Self::Three),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum NodeAction {
    Change,
    Add,
    Delete,
    Replace,
}

impl NodeAction {
    fn parse(s: &[u8]) -> Option<Self> {
        match s {
            b"change" => Some(Self::Change),
            b"add" => Some(Self::Add),
            b"delete" => Some(Self::Delete),
            b"replace" => Some(Self::Replace),
            _ => None,
        }
    }

    pub(crate) fn describe(self) -> &'static str {
        match self {
            Self::Change => "CHANGE",
            Self::Add => "ADD",
            Self::Delete => "DELETE",
            Self::Replace => "REPLACE",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum NodeKind {
    File,
    Dir,
}

impl NodeKind {
    fn parse(s: &[u8]) -> Option<Self> {
        match s {
            b"file" => Some(Self::File),
            b"dir" => Some(Self::Dir),
            _ => None,
        }
    }

    pub(crate) fn describe(kind: Option<Self>) -> &'static str {
        match kind {
            None => "NONE",
            Some(Self::File) => "FILE",
            Some(Self::Dir) => "DIR",
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct NodeCopyFrom {
    pub(crate) rev: u32,
    pub(crate) path: Vec<u8>,
}

/// Author, date and log message of the revision a node belongs to, shared by
/// every node of that revision.
#[derive(Debug, Default)]
pub(crate) struct RevMeta {
    pub(crate) author: Vec<u8>,
    pub(crate) date: i64,
    pub(crate) log: Option<Vec<u8>>,
}

/// One node change record, together with the context of its revision.
pub(crate) struct RevNode {
    pub(crate) rev: u32,
    pub(crate) meta: Rc<RevMeta>,
    pub(crate) path: Vec<u8>,
    pub(crate) kind: Option<NodeKind>,
    pub(crate) action: NodeAction,
    pub(crate) copy_from: Option<NodeCopyFrom>,
    pub(crate) executable: bool,
    pub(crate) text: Option<Vec<u8>>,
    pub(crate) text_md5: Option<Vec<u8>>,
    pub(crate) text_sha1: Option<Vec<u8>>,
}

impl RevNode {
    pub(crate) fn has_copy_from(&self) -> bool {
        self.copy_from.is_some()
    }

    pub(crate) fn describe(&self) -> String {
        format!(
            "{} {}",
            self.action.describe(),
            NodeKind::describe(self.kind),
        )
    }
}

#[derive(Debug)]
pub(crate) enum ReadError {
    Io(std::io::Error),
    BrokenHeader,
    InvalidVersion { version: Vec<u8> },
    MissingHeaderEntry { key: Vec<u8> },
    InvalidHeaderEntry { key: Vec<u8>, value: Vec<u8> },
    UnknownRecordType,
    MismatchedContentLen,
    BrokenProperties,
    DeltasUnsupported,
    NodeBeforeRevision,
}

impl From<std::io::Error> for ReadError {
    #[inline]
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl std::fmt::Display for ReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Io(ref e) => write!(f, "failed to read source: {e}"),
            Self::BrokenHeader => write!(f, "broken record header"),
            Self::InvalidVersion { ref version } => {
                write!(f, "invalid dump version: \"{}\"", version.escape_ascii())
            }
            Self::MissingHeaderEntry { ref key } => {
                write!(f, "missing header entry: \"{}\"", key.escape_ascii())
            }
            Self::InvalidHeaderEntry { ref key, ref value } => write!(
                f,
                "invalid value for header entry \"{}\": \"{}\"",
                key.escape_ascii(),
                value.escape_ascii(),
            ),
            Self::UnknownRecordType => write!(f, "unknown record type"),
            Self::MismatchedContentLen => write!(f, "mismatched content length"),
            Self::BrokenProperties => write!(f, "broken property block"),
            Self::DeltasUnsupported => {
                write!(f, "deltified dumps are not supported, use \"svnadmin dump\" without --deltas")
            }
            Self::NodeBeforeRevision => {
                write!(f, "node record before the first revision record")
            }
        }
    }
}

type RecordHeader = HashMap<Vec<u8>, Vec<u8>>;

/// Streams the nodes of a dump, keeping track of the current revision.
///
/// Reads the per-revision properties (`svn:author`, `svn:date`, `svn:log`)
/// and attaches them to every node of the revision. Node text is loaded into
/// memory, or skipped when `ignore_text` is set.
pub(crate) struct NodeStream<'a> {
    source: &'a mut dyn std::io::BufRead,
    version: DumpVersion,
    ignore_text: bool,
    rev: Option<u32>,
    rev_meta: Rc<RevMeta>,
    // From the svn:sync-last-merged-rev property of mirror dumps; lets the
    // status display show a percentage.
    final_rev: Option<u32>,
}

impl<'a> NodeStream<'a> {
    pub(crate) fn new(
        source: &'a mut dyn std::io::BufRead,
        ignore_text: bool,
    ) -> Result<Self, ReadError> {
        let header = parse_header(source)?
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::UnexpectedEof))?;

        let version_key = b"SVN-fs-dump-format-version";
        let raw_version =
            header
                .get(version_key.as_slice())
                .ok_or_else(|| ReadError::MissingHeaderEntry {
                    key: version_key.to_vec(),
                })?;
        let version = DumpVersion::parse(raw_version).ok_or_else(|| ReadError::InvalidVersion {
            version: raw_version.clone(),
        })?;

        Ok(Self {
            source,
            version,
            ignore_text,
            rev: None,
            rev_meta: Rc::new(RevMeta::default()),
            final_rev: None,
        })
    }

    #[inline]
    pub(crate) fn final_rev(&self) -> Option<u32> {
        self.final_rev
    }

    /// Next node record, or `None` at end of stream. Revision and UUID
    /// records are consumed internally.
    pub(crate) fn next_node(&mut self) -> Result<Option<RevNode>, ReadError> {
        loop {
            let Some(header) = parse_header(self.source)? else {
                return Ok(None);
            };

            if let Some(raw_uuid) = header.get(b"UUID".as_slice()) {
                let uuid = uuid::Uuid::try_parse_ascii(raw_uuid).map_err(|_| {
                    ReadError::InvalidHeaderEntry {
                        key: b"UUID".to_vec(),
                        value: raw_uuid.clone(),
                    }
                })?;
                tracing::info!("SVN repository UUID: {uuid}");
            } else if header.contains_key(b"Revision-number".as_slice()) {
                self.read_rev_record(&header)?;
            } else if header.contains_key(b"Node-path".as_slice()) {
                return Ok(Some(self.read_node_record(&header)?));
            } else {
                return Err(ReadError::UnknownRecordType);
            }
        }
    }

    fn read_rev_record(&mut self, header: &RecordHeader) -> Result<(), ReadError> {
        let rev = get_u32(header, b"Revision-number")?.unwrap();

        let prop_content_len = get_u64(header, b"Prop-content-length")?;
        let content_len = get_u64(header, b"Content-length")?;
        if prop_content_len.unwrap_or(0) != content_len.unwrap_or(0) {
            return Err(ReadError::MismatchedContentLen);
        }

        let mut meta = RevMeta::default();
        if let Some(prop_content_len) = prop_content_len {
            let mut props = self.read_properties(prop_content_len)?;

            // If the SVN repository is a mirror, revision 0 carries the UUID
            // of the original repository.
            if rev == 0 {
                if let Some(raw_uuid) = props.get(b"svn:sync-from-uuid".as_slice()) {
                    let uuid = std::str::from_utf8(raw_uuid)
                        .ok()
                        .and_then(|raw| uuid::Uuid::parse_str(raw).ok())
                        .ok_or_else(|| ReadError::InvalidHeaderEntry {
                            key: b"svn:sync-from-uuid".to_vec(),
                            value: raw_uuid.clone(),
                        })?;
                    tracing::info!("original SVN repository UUID: {uuid}");
                }
            }
            if let Some(raw_last) = props.get(b"svn:sync-last-merged-rev".as_slice()) {
                self.final_rev = std::str::from_utf8(raw_last)
                    .ok()
                    .and_then(|s| s.parse().ok());
            }

            meta.author = props.remove(b"svn:author".as_slice()).unwrap_or_default();
            meta.date = props
                .get(b"svn:date".as_slice())
                .map(|raw| parse_svn_date(rev, raw))
                .unwrap_or(0);
            meta.log = props.remove(b"svn:log".as_slice());
        }

        if self.rev.is_some_and(|prev| rev <= prev) {
            tracing::warn!("r{rev}: non monotonic revision numbers in dump");
        }
        self.rev = Some(rev);
        self.rev_meta = Rc::new(meta);
        Ok(())
    }

    fn read_node_record(&mut self, header: &RecordHeader) -> Result<RevNode, ReadError> {
        let rev = self.rev.ok_or(ReadError::NodeBeforeRevision)?;

        let path = header.get(b"Node-path".as_slice()).unwrap().clone();

        let kind = header
            .get(b"Node-kind".as_slice())
            .map(|raw| {
                NodeKind::parse(raw).ok_or_else(|| ReadError::InvalidHeaderEntry {
                    key: b"Node-kind".to_vec(),
                    value: raw.clone(),
                })
            })
            .transpose()?;

        let action_key = b"Node-action";
        let raw_action =
            header
                .get(action_key.as_slice())
                .ok_or_else(|| ReadError::MissingHeaderEntry {
                    key: action_key.to_vec(),
                })?;
        let action = NodeAction::parse(raw_action).ok_or_else(|| ReadError::InvalidHeaderEntry {
            key: action_key.to_vec(),
            value: raw_action.clone(),
        })?;

        let copy_from = match (
            get_u32(header, b"Node-copyfrom-rev")?,
            header.get(b"Node-copyfrom-path".as_slice()),
        ) {
            (None, None) => None,
            (Some(rev), Some(path)) => Some(NodeCopyFrom {
                rev,
                path: path.clone(),
            }),
            (Some(_), None) => {
                return Err(ReadError::MissingHeaderEntry {
                    key: b"Node-copyfrom-path".to_vec(),
                });
            }
            (None, Some(_)) => {
                return Err(ReadError::MissingHeaderEntry {
                    key: b"Node-copyfrom-rev".to_vec(),
                });
            }
        };

        if get_bool(header, b"Text-delta")?.unwrap_or(false)
            || get_bool(header, b"Prop-delta")?.unwrap_or(false)
        {
            // Version 3 dumps are accepted as long as they do not actually
            // use deltas; only full-text nodes can be replayed.
            tracing::debug!(
                "r{rev}: deltified node in a {:?} format dump",
                self.version,
            );
            return Err(ReadError::DeltasUnsupported);
        }

        let prop_content_len = get_u64(header, b"Prop-content-length")?;
        let text_content_len = get_u64(header, b"Text-content-length")?;
        let content_len = get_u64(header, b"Content-length")?;

        let expected_content_len = prop_content_len
            .unwrap_or(0)
            .checked_add(text_content_len.unwrap_or(0))
            .ok_or(ReadError::MismatchedContentLen)?;
        if content_len.unwrap_or(0) != expected_content_len {
            return Err(ReadError::MismatchedContentLen);
        }

        let mut executable = false;
        if let Some(prop_content_len) = prop_content_len {
            let props = self.read_properties(prop_content_len)?;
            executable = props.contains_key(b"svn:executable".as_slice());
        }

        let mut text = None;
        if let Some(text_content_len) = text_content_len {
            if self.ignore_text {
                self.skip_text(text_content_len)?;
            } else {
                let len = usize::try_from(text_content_len)
                    .map_err(|_| ReadError::MismatchedContentLen)?;
                let mut buf = vec![0; len];
                self.source.read_exact(&mut buf)?;
                text = Some(buf);
            }
        }

        Ok(RevNode {
            rev,
            meta: self.rev_meta.clone(),
            path,
            kind,
            action,
            copy_from,
            executable,
            text,
            text_md5: header.get(b"Text-content-md5".as_slice()).cloned(),
            text_sha1: header.get(b"Text-content-sha1".as_slice()).cloned(),
        })
    }

    fn read_properties(
        &mut self,
        content_len: u64,
    ) -> Result<HashMap<Vec<u8>, Vec<u8>>, ReadError> {
        let mut prop_stream = std::io::Read::take(&mut self.source, content_len);
        match parse_properties(&mut prop_stream) {
            Ok(props) => {
                if prop_stream.limit() != 0 {
                    Err(ReadError::BrokenProperties)
                } else {
                    Ok(props)
                }
            }
            Err(e) => match e.kind() {
                std::io::ErrorKind::InvalidData | std::io::ErrorKind::UnexpectedEof => {
                    Err(ReadError::BrokenProperties)
                }
                _ => Err(ReadError::Io(e)),
            },
        }
    }

    fn skip_text(&mut self, mut rem: u64) -> Result<(), ReadError> {
        let mut buf = [0; 8192];
        while rem != 0 {
            let chunk = rem.min(buf.len() as u64) as usize;
            self.source.read_exact(&mut buf[..chunk])?;
            rem -= chunk as u64;
        }
        Ok(())
    }
}

fn get_u64(header: &RecordHeader, key: &[u8]) -> Result<Option<u64>, ReadError> {
    header
        .get(key)
        .map(|raw| {
            std::str::from_utf8(raw)
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or_else(|| ReadError::InvalidHeaderEntry {
                    key: key.to_vec(),
                    value: raw.clone(),
                })
        })
        .transpose()
}

fn get_u32(header: &RecordHeader, key: &[u8]) -> Result<Option<u32>, ReadError> {
    header
        .get(key)
        .map(|raw| {
            std::str::from_utf8(raw)
                .ok()
                .and_then(|s| s.parse::<u32>().ok())
                .ok_or_else(|| ReadError::InvalidHeaderEntry {
                    key: key.to_vec(),
                    value: raw.clone(),
                })
        })
        .transpose()
}

fn get_bool(header: &RecordHeader, key: &[u8]) -> Result<Option<bool>, ReadError> {
    header
        .get(key)
        .map(|raw| match raw.as_slice() {
            b"true" => Ok(true),
            b"false" => Ok(false),
            _ => Err(ReadError::InvalidHeaderEntry {
                key: key.to_vec(),
                value: raw.clone(),
            }),
        })
        .transpose()
}

fn parse_svn_date(rev: u32, raw: &[u8]) -> i64 {
    let parsed = std::str::from_utf8(raw)
        .ok()
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok());
    match parsed {
        Some(date) => date.timestamp(),
        None => {
            tracing::warn!("r{rev}: invalid svn:date \"{}\"", raw.escape_ascii());
            0
        }
    }
}

fn parse_header(r: &mut dyn std::io::BufRead) -> Result<Option<RecordHeader>, ReadError> {
    let mut buf = Vec::new();
    r.read_until(b'\n', &mut buf)?;
    while buf == b"\n" {
        buf.clear();
        r.read_until(b'\n', &mut buf)?;
    }
    if buf.is_empty() {
        return Ok(None);
    }
    let mut map = HashMap::new();
    while buf != b"\n" {
        let line = buf.strip_suffix(b"\n").ok_or(ReadError::BrokenHeader)?;

        let sep_pos = line
            .windows(2)
            .position(|n| n == b": ")
            .ok_or(ReadError::BrokenHeader)?;
        map.insert(line[..sep_pos].to_vec(), line[(sep_pos + 2)..].to_vec());

        buf.clear();
        r.read_until(b'\n', &mut buf)?;
        if buf.is_empty() {
            // A node header may be the last record of the dump.
            break;
        }
    }

    Ok(Some(map))
}

fn parse_properties(
    r: &mut dyn std::io::BufRead,
) -> Result<HashMap<Vec<u8>, Vec<u8>>, std::io::Error> {
    let mut buf = Vec::new();
    let mut props = HashMap::new();
    loop {
        buf.clear();
        r.read_until(b'\n', &mut buf)?;
        let line = buf
            .strip_suffix(b"\n")
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::UnexpectedEof))?;

        if line == b"PROPS-END" {
            break;
        }

        let key_len = line
            .strip_prefix(b"K ")
            .and_then(|s| std::str::from_utf8(s).ok())
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::InvalidData))?;

        let mut key = vec![0; key_len];
        r.read_exact(&mut key)?;
        read_newline(r)?;

        buf.clear();
        r.read_until(b'\n', &mut buf)?;
        let line = buf
            .strip_suffix(b"\n")
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::UnexpectedEof))?;

        let value_len = line
            .strip_prefix(b"V ")
            .and_then(|s| std::str::from_utf8(s).ok())
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::InvalidData))?;

        let mut value = vec![0; value_len];
        r.read_exact(&mut value)?;
        read_newline(r)?;

        props.insert(key, value);
    }

    Ok(props)
}

fn read_newline(r: &mut dyn std::io::BufRead) -> Result<(), std::io::Error> {
    let mut tmp = [0];
    r.read_exact(&mut tmp)?;
    if tmp != *b"\n" {
        return Err(std::io::Error::from(std::io::ErrorKind::InvalidData));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{NodeAction, NodeKind, NodeStream};

    const SAMPLE: &[u8] = b"SVN-fs-dump-format-version: 2\n\
        \n\
        UUID: 7bde2fcd-87aa-4434-a6dd-c5335faf4478\n\
        \n\
        Revision-number: 1\n\
        Prop-content-length: 105\n\
        Content-length: 105\n\
        \n\
        K 10\n\
        svn:author\n\
        V 5\n\
        johnw\n\
        K 8\n\
        svn:date\n\
        V 27\n\
        2011-01-01T12:00:00.000000Z\n\
        K 7\n\
        svn:log\n\
        V 6\n\
        r1 log\n\
        PROPS-END\n\
        \n\
        Node-path: trunk/a.c\n\
        Node-kind: file\n\
        Node-action: add\n\
        Text-content-length: 2\n\
        Content-length: 2\n\
        \n\
        x\n\
        \n\
        Node-path: trunk/b.c\n\
        Node-kind: file\n\
        Node-action: add\n\
        Node-copyfrom-rev: 1\n\
        Node-copyfrom-path: trunk/a.c\n\
        \n";

    #[test]
    fn reads_nodes_with_rev_context() {
        let mut src = SAMPLE;
        let mut stream = NodeStream::new(&mut src, false).unwrap();

        let node = stream.next_node().unwrap().unwrap();
        assert_eq!(node.rev, 1);
        assert_eq!(node.path, b"trunk/a.c");
        assert_eq!(node.kind, Some(NodeKind::File));
        assert_eq!(node.action, NodeAction::Add);
        assert_eq!(node.meta.author, b"johnw");
        assert_eq!(node.meta.log.as_deref(), Some(b"r1 log".as_slice()));
        assert_eq!(node.meta.date, 1293883200);
        assert_eq!(node.text.as_deref(), Some(b"x\n".as_slice()));
        assert!(!node.has_copy_from());

        let node = stream.next_node().unwrap().unwrap();
        assert_eq!(node.path, b"trunk/b.c");
        let copy_from = node.copy_from.as_ref().unwrap();
        assert_eq!((copy_from.rev, copy_from.path.as_slice()), (1, b"trunk/a.c".as_slice()));
        assert!(node.text.is_none());

        assert!(stream.next_node().unwrap().is_none());
    }

    #[test]
    fn ignore_text_skips_content() {
        let mut src = SAMPLE;
        let mut stream = NodeStream::new(&mut src, true).unwrap();
        let node = stream.next_node().unwrap().unwrap();
        assert!(node.text.is_none());
        let node = stream.next_node().unwrap().unwrap();
        assert_eq!(node.path, b"trunk/b.c");
    }
}
