//! Sandboxed file storage
//!
//! The FileStore is the trusted capability handed to command handlers: every
//! operation takes a bare filename, never a path, and `validate_name` rejects
//! anything that could escape the base directory before the filesystem is
//! touched.

use crate::error::FileError;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};

pub const MAX_FILENAME_LEN: usize = 255;

const FORBIDDEN_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

/// File metadata for the /info command.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub readonly: bool,
}

/// Capability over one storage directory.
#[derive(Debug)]
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `base_dir`, creating the directory if needed.
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self, FileError> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn validate_name(name: &str) -> Result<(), FileError> {
        if name.is_empty() {
            return Err(FileError::InvalidFilename("name is empty"));
        }
        if name.len() > MAX_FILENAME_LEN {
            return Err(FileError::InvalidFilename("name too long (max 255)"));
        }
        if name.contains('/') || name.contains('\\') {
            return Err(FileError::InvalidFilename("path separators are not allowed"));
        }
        if name == "." || name.contains("..") {
            return Err(FileError::InvalidFilename("directory traversal is not allowed"));
        }
        if name.chars().any(|c| FORBIDDEN_CHARS.contains(&c)) {
            return Err(FileError::InvalidFilename("contains a forbidden character"));
        }
        Ok(())
    }

    /// Resolve a client-supplied name to a path inside the base directory,
    /// or reject it.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, FileError> {
        Self::validate_name(name)?;
        Ok(self.base_dir.join(name))
    }

    /// Names of all stored files, sorted.
    pub fn list(&self) -> Result<Vec<String>, FileError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.base_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn read(&self, name: &str) -> Result<Vec<u8>, FileError> {
        let path = self.resolve(name)?;
        if !path.is_file() {
            return Err(FileError::NotFound(name.to_string()));
        }
        Ok(fs::read(path)?)
    }

    pub fn write(&self, name: &str, bytes: &[u8]) -> Result<(), FileError> {
        let path = self.resolve(name)?;
        fs::write(path, bytes)?;
        Ok(())
    }

    /// Delete a stored file. Returns false when the file does not exist.
    pub fn delete(&self, name: &str) -> Result<bool, FileError> {
        let path = self.resolve(name)?;
        if !path.is_file() {
            return Ok(false);
        }
        fs::remove_file(path)?;
        Ok(true)
    }

    /// Case-insensitive substring search over stored file names.
    pub fn search(&self, keyword: &str) -> Result<Vec<String>, FileError> {
        let keyword = keyword.to_lowercase();
        Ok(self
            .list()?
            .into_iter()
            .filter(|name| name.to_lowercase().contains(&keyword))
            .collect())
    }

    pub fn stat(&self, name: &str) -> Result<FileInfo, FileError> {
        let path = self.resolve(name)?;
        if !path.is_file() {
            return Err(FileError::NotFound(name.to_string()));
        }
        let meta = fs::metadata(&path)?;
        Ok(FileInfo {
            name: name.to_string(),
            size: meta.len(),
            created: meta.created().ok().map(DateTime::<Utc>::from),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
            readonly: meta.permissions().readonly(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, FileStore) {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_write_read_delete_round_trip() {
        let (_dir, store) = store();
        store.write("notes.txt", b"hello world").unwrap();
        assert_eq!(store.read("notes.txt").unwrap(), b"hello world");
        assert!(store.delete("notes.txt").unwrap());
        assert!(!store.delete("notes.txt").unwrap());
        assert!(matches!(
            store.read("notes.txt"),
            Err(FileError::NotFound(_))
        ));
    }

    #[test]
    fn test_unsafe_names_are_rejected() {
        let (_dir, store) = store();
        for name in [
            "",
            "a/b",
            "a\\b",
            "..",
            "../escape",
            "trick..name",
            "pipe|name",
            "wild*card",
            "quoted\"name",
            &"x".repeat(256),
        ] {
            assert!(
                matches!(store.resolve(name), Err(FileError::InvalidFilename(_))),
                "accepted {name:?}"
            );
        }
    }

    #[test]
    fn test_plain_names_are_accepted() {
        let (_dir, store) = store();
        for name in ["a", "report.txt", "data-2024_v1.bin", &"x".repeat(255)] {
            assert!(store.resolve(name).is_ok(), "rejected {name:?}");
        }
    }

    #[test]
    fn test_list_is_sorted() {
        let (_dir, store) = store();
        store.write("b.txt", b"").unwrap();
        store.write("a.txt", b"").unwrap();
        assert_eq!(store.list().unwrap(), vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let (_dir, store) = store();
        store.write("Report-Q1.txt", b"").unwrap();
        store.write("notes.txt", b"").unwrap();
        assert_eq!(store.search("report").unwrap(), vec!["Report-Q1.txt"]);
        assert!(store.search("missing").unwrap().is_empty());
    }

    #[test]
    fn test_stat_reports_size() {
        let (_dir, store) = store();
        store.write("sized.bin", &[0u8; 42]).unwrap();
        let info = store.stat("sized.bin").unwrap();
        assert_eq!(info.size, 42);
        assert_eq!(info.name, "sized.bin");
    }
}
