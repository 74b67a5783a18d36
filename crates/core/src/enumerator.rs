//! Recursive discovery of the files to upload

use crate::error::{Error, Result};
use crate::model::UploadTask;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Lazily walks a directory tree and yields one [`UploadTask`] per regular file.
///
/// Entries are sorted by file name at every level, so two walks over the same
/// tree produce the same sequence. Symbolic links are followed; link cycles
/// and dangling links are skipped and a target reached through several links
/// is yielded once.
///
/// Files are stored flat in the deposit, so two files sharing a base name
/// yield [`Error::DuplicateRemoteName`].
pub struct FileEnumerator {
    root: PathBuf,
    walker: walkdir::IntoIter,
    seen: HashSet<PathBuf>,
    names: HashMap<String, PathBuf>,
}

impl FileEnumerator {
    /// Validate `root` and prepare the walk
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();

        let metadata = fs::metadata(root).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(root.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => Error::PermissionDenied(root.to_path_buf()),
            _ => Error::Io(e),
        })?;

        if !metadata.is_dir() {
            return Err(Error::NotADirectory(root.to_path_buf()));
        }

        let root = fs::canonicalize(root)?;
        let walker = WalkDir::new(&root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter();

        Ok(Self {
            root,
            walker,
            seen: HashSet::new(),
            names: HashMap::new(),
        })
    }

    /// Canonical root of the walk
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn is_dangling_link(&self, err: &walkdir::Error) -> bool {
        err.depth() > 0
            && err.path() != Some(self.root.as_path())
            && err.io_error().map(|e| e.kind()) == Some(std::io::ErrorKind::NotFound)
    }
}

impl Iterator for FileEnumerator {
    type Item = Result<UploadTask>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(err) if err.loop_ancestor().is_some() => {
                    tracing::debug!(path = ?err.path(), "skipping symlink cycle");
                    continue;
                }
                Err(err) if self.is_dangling_link(&err) => {
                    tracing::warn!(path = ?err.path(), "skipping symlink with a missing target");
                    continue;
                }
                Err(err) => return Some(Err(err.into())),
            };

            // follow_links(true) reports the target's type
            if !entry.file_type().is_file() {
                continue;
            }

            let canonical = match fs::canonicalize(entry.path()) {
                Ok(path) => path,
                Err(e) => return Some(Err(Error::Io(e))),
            };
            if !self.seen.insert(canonical) {
                tracing::debug!(path = %entry.path().display(), "already listed through another link");
                continue;
            }

            let size = match entry.metadata() {
                Ok(metadata) => metadata.len(),
                Err(err) => return Some(Err(err.into())),
            };

            let relative_name = entry.file_name().to_string_lossy().into_owned();
            if let Some(first) = self.names.get(&relative_name) {
                return Some(Err(Error::DuplicateRemoteName {
                    name: relative_name,
                    first: first.clone(),
                    second: entry.into_path(),
                }));
            }
            self.names.insert(relative_name.clone(), entry.path().to_path_buf());

            return Some(Ok(UploadTask {
                path: entry.into_path(),
                size,
                relative_name,
            }));
        }
    }
}
