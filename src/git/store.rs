use std::io::Write as _;
use std::path::{Path, PathBuf};

use gix_hash::ObjectId;

use crate::git::object::Blob;

#[derive(Debug)]
pub(crate) enum WriterError {
    Io {
        path: PathBuf,
        error: std::io::Error,
    },
    SpawnProcessError {
        arg0: std::ffi::OsString,
        error: std::io::Error,
    },
    ProcessFailed {
        arg0: std::ffi::OsString,
        code: std::process::ExitStatus,
    },
}

impl std::fmt::Display for WriterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, error } => write!(f, "failed to write {path:?}: {error}"),
            Self::SpawnProcessError { arg0, error } => {
                write!(f, "failed to spawn process {arg0:?}: {error}")
            }
            Self::ProcessFailed { arg0, code } => {
                write!(f, "process {arg0:?} finished with {code}")
            }
        }
    }
}

/// Writes loose objects, refs and plain files into a git directory. Objects
/// are zlib-deflated under `objects/xx/…`; packing is left to `git gc`.
pub(crate) struct ObjectStore {
    work_dir: PathBuf,
    git_dir: PathBuf,
    hash_kind: gix_hash::Kind,
}

impl ObjectStore {
    /// Opens the repository at `path`, initializing a fresh one when the
    /// directory does not contain a git repository yet.
    pub(crate) fn open(path: &Path) -> Result<Self, WriterError> {
        let git_dir = path.join(".git");

        if !git_dir.join("objects").is_dir() {
            for sub_dir in ["objects/info", "objects/pack", "refs/heads", "refs/tags"] {
                let dir = git_dir.join(sub_dir);
                std::fs::create_dir_all(&dir).map_err(|e| WriterError::Io {
                    path: dir.clone(),
                    error: e,
                })?;
            }
            write_file(&git_dir.join("HEAD"), b"ref: refs/heads/master\n")?;
            write_file(
                &git_dir.join("config"),
                b"[core]\n\trepositoryformatversion = 0\n\tfilemode = true\n\tbare = false\n",
            )?;
        }

        Ok(Self {
            work_dir: path.to_path_buf(),
            git_dir,
            hash_kind: gix_hash::Kind::Sha1,
        })
    }

    /// Writes a raw object body of the given kind; returns its identity.
    /// Writing an object that already exists is a no-op.
    pub(crate) fn put_raw(
        &self,
        kind: gix_object::Kind,
        data: &[u8],
    ) -> Result<ObjectId, WriterError> {
        let oid = gix_object::compute_hash(self.hash_kind, kind, data);

        let hex = oid.to_string();
        let (obj_sub_dir, obj_file) = hex.split_at(2);
        let obj_dir = self.git_dir.join("objects").join(obj_sub_dir);
        let obj_path = obj_dir.join(obj_file);
        if obj_path.exists() {
            return Ok(oid);
        }

        std::fs::create_dir_all(&obj_dir).map_err(|e| WriterError::Io {
            path: obj_dir.clone(),
            error: e,
        })?;

        let map_err = |e| WriterError::Io {
            path: obj_path.clone(),
            error: e,
        };

        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(kind.as_bytes()).map_err(map_err)?;
        write!(encoder, " {}\0", data.len()).map_err(map_err)?;
        encoder.write_all(data).map_err(map_err)?;
        let compressed = encoder.finish().map_err(map_err)?;

        // Write through a temporary name so a crash never leaves a truncated
        // object under its final name.
        let tmp_path = obj_dir.join(format!("tmp_{obj_file}"));
        std::fs::write(&tmp_path, compressed).map_err(|e| WriterError::Io {
            path: tmp_path.clone(),
            error: e,
        })?;
        std::fs::rename(&tmp_path, &obj_path).map_err(|e| WriterError::Io {
            path: obj_path.clone(),
            error: e,
        })?;

        Ok(oid)
    }

    /// Serializes and writes a tree, commit or tag object.
    pub(crate) fn put(&self, object: &impl gix_object::WriteTo) -> Result<ObjectId, WriterError> {
        let mut raw = Vec::new();
        object.write_to(&mut raw).unwrap();
        self.put_raw(object.kind(), &raw)
    }

    /// Creates a blob; the content is written immediately, so the returned
    /// blob carries its final identity.
    pub(crate) fn create_blob(
        &self,
        name: Vec<u8>,
        data: &[u8],
        executable: bool,
    ) -> Result<Blob, WriterError> {
        let oid = self.put_raw(gix_object::Kind::Blob, data)?;
        Ok(Blob {
            name,
            executable,
            oid,
        })
    }

    /// Points `refs/heads/<name>` (or `refs/tags/<name>`) at an object.
    pub(crate) fn create_ref(
        &self,
        name: &str,
        oid: ObjectId,
        is_tag: bool,
    ) -> Result<(), WriterError> {
        let kind = if is_tag { "tags" } else { "heads" };
        self.create_file(&format!("refs/{kind}/{name}"), format!("{oid}\n").as_bytes())
    }

    pub(crate) fn delete_ref(&self, name: &str, is_tag: bool) -> Result<(), WriterError> {
        let kind = if is_tag { "tags" } else { "heads" };
        let path = self.git_dir.join("refs").join(kind).join(name);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WriterError::Io { path, error: e }),
        }
    }

    /// Writes a file below the git directory (used for refs and HEAD).
    pub(crate) fn create_file(&self, rel_path: &str, content: &[u8]) -> Result<(), WriterError> {
        let path = self.git_dir.join(rel_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| WriterError::Io {
                path: parent.to_path_buf(),
                error: e,
            })?;
        }
        write_file(&path, content)
    }

    /// Runs "git gc" on the repository; invoked at the configured revision
    /// cadence and once more when the conversion finishes.
    pub(crate) fn garbage_collect(&self) -> Result<(), WriterError> {
        let mut child = std::process::Command::new("git")
            .arg("gc")
            .arg("--quiet")
            .current_dir(&self.work_dir)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::inherit())
            .stderr(std::process::Stdio::inherit())
            .spawn()
            .map_err(|e| WriterError::SpawnProcessError {
                arg0: "git".into(),
                error: e,
            })?;
        let exit_code = child.wait().map_err(|e| WriterError::SpawnProcessError {
            arg0: "git".into(),
            error: e,
        })?;
        if !exit_code.success() {
            return Err(WriterError::ProcessFailed {
                arg0: "git".into(),
                code: exit_code,
            });
        }
        Ok(())
    }
}

fn write_file(path: &Path, content: &[u8]) -> Result<(), WriterError> {
    std::fs::write(path, content).map_err(|e| WriterError::Io {
        path: path.to_path_buf(),
        error: e,
    })
}

#[cfg(test)]
mod tests {
    use super::ObjectStore;

    #[test]
    fn blob_write_is_deterministic_and_loose() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).unwrap();

        let oid = store.put_raw(gix_object::Kind::Blob, b"x\n").unwrap();
        // well-known git hash of the blob "x\n"
        assert_eq!(oid.to_string(), "587be6b4c3f93f93c489c0111bba5596147a26cb");

        let obj_path = dir
            .path()
            .join(".git/objects/58/7be6b4c3f93f93c489c0111bba5596147a26cb");
        assert!(obj_path.is_file());

        // writing again hits the existing object
        let again = store.put_raw(gix_object::Kind::Blob, b"x\n").unwrap();
        assert_eq!(oid, again);
    }

    #[test]
    fn init_creates_repository_layout() {
        let dir = tempfile::tempdir().unwrap();
        let _store = ObjectStore::open(dir.path()).unwrap();
        assert!(dir.path().join(".git/objects").is_dir());
        assert!(dir.path().join(".git/refs/heads").is_dir());
        assert!(dir.path().join(".git/HEAD").is_file());
    }

    #[test]
    fn refs_are_plain_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).unwrap();
        let oid = store.put_raw(gix_object::Kind::Blob, b"content\n").unwrap();

        store.create_ref("master", oid, false).unwrap();
        let written = std::fs::read_to_string(dir.path().join(".git/refs/heads/master")).unwrap();
        assert_eq!(written, format!("{oid}\n"));

        store.delete_ref("master", false).unwrap();
        assert!(!dir.path().join(".git/refs/heads/master").exists());
        // deleting a missing ref is fine
        store.delete_ref("master", false).unwrap();
    }
}
