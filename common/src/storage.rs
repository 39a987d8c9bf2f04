use crate::error::StorageError;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// Key/value upload boundary. Implementations must be usable from the
/// blocking thread pool.
pub trait ObjectStore: Send + Sync {
    fn store(&self, key: &str, reader: &mut dyn Read) -> Result<(), StorageError>;
}

/// Bucket backed by a local (or mounted) directory. Objects are written to a
/// hidden temporary file and renamed into place once complete.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn write(&self, key: &str, reader: &mut dyn Read) -> io::Result<()> {
        fs::create_dir_all(&self.root)?;
        let partial = self.root.join(format!(".{}.partial", key));
        let result = File::create(&partial).and_then(|mut file| {
            io::copy(reader, &mut file)?;
            file.flush()?;
            file.sync_all()
        });
        match result {
            Ok(()) => fs::rename(&partial, self.object_path(key)),
            Err(e) => {
                let _ = fs::remove_file(&partial);
                Err(e)
            }
        }
    }
}

impl ObjectStore for DirectoryStore {
    fn store(&self, key: &str, reader: &mut dyn Read) -> Result<(), StorageError> {
        if key.is_empty() || key == "." || key == ".." || key.contains(['/', '\\']) {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        self.write(key, reader).map_err(|source| StorageError::Io {
            key: key.to_string(),
            source,
        })
    }
}
