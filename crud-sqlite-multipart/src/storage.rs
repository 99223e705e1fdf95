//! Filesystem storage for uploaded note content.
//!
//! Uploads land in one of two flat directories, one per [`StorageRoot`], under
//! a generated name: a random UUIDv4 followed by the original extension. The
//! extension is kept so images can be served with the right content type
//! later on. Random names are the only isolation between concurrent writers.

use std::path::{Path, PathBuf};

use tokio::fs;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("storage io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid stored name '{0}'")]
    InvalidName(String),
}

impl Error {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageRoot {
    Images,
    Files,
}

/// An upload already read into memory.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

impl Upload {
    pub fn new(file_name: impl Into<String>, content_type: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            content: content.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Storage {
    images_dir: PathBuf,
    files_dir: PathBuf,
}

impl Storage {
    pub fn new(images_dir: impl Into<PathBuf>, files_dir: impl Into<PathBuf>) -> Self {
        Self {
            images_dir: images_dir.into(),
            files_dir: files_dir.into(),
        }
    }

    pub fn root(&self, root: StorageRoot) -> &Path {
        match root {
            StorageRoot::Images => &self.images_dir,
            StorageRoot::Files => &self.files_dir,
        }
    }

    pub async fn ensure_roots(&self) -> Result<()> {
        for dir in [&self.images_dir, &self.files_dir] {
            fs::create_dir_all(dir).await.map_err(|e| Error::io(dir, e))?;
        }
        Ok(())
    }

    /// Writes the upload under `root` and returns its stored name.
    pub async fn store(&self, root: StorageRoot, upload: &Upload) -> Result<String> {
        let stored_name = generate_stored_name(&upload.file_name);
        let path = self.root(root).join(&stored_name);

        fs::write(&path, &upload.content).await.map_err(|e| {
            tracing::warn!(path = %path.display(), error = %e, "storage: write failed");
            Error::io(&path, e)
        })?;

        tracing::debug!(
            stored_name = %stored_name,
            original_name = %upload.file_name,
            size = upload.len(),
            "storage: stored upload"
        );

        Ok(stored_name)
    }

    /// Removes a stored file. A file that is already gone is not an error.
    pub async fn delete(&self, root: StorageRoot, stored_name: &str) -> Result<()> {
        let path = self.path(root, stored_name)?;

        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(stored_name = %stored_name, "storage: deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(&path, e)),
        }
    }

    pub async fn read(&self, root: StorageRoot, stored_name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(root, stored_name)?;

        match fs::read(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(&path, e)),
        }
    }

    pub async fn exists(&self, root: StorageRoot, stored_name: &str) -> Result<bool> {
        let path = self.path(root, stored_name)?;
        fs::try_exists(&path).await.map_err(|e| Error::io(&path, e))
    }

    fn path(&self, root: StorageRoot, stored_name: &str) -> Result<PathBuf> {
        if !is_valid_stored_name(stored_name) {
            return Err(Error::InvalidName(stored_name.into()));
        }
        Ok(self.root(root).join(stored_name))
    }
}

/// Stored names are always a single plain path component.
pub fn is_valid_stored_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

fn generate_stored_name(original_name: &str) -> String {
    let token = Uuid::new_v4();
    match extension(original_name) {
        Some(ext) => format!("{token}.{ext}"),
        None => token.to_string(),
    }
}

fn extension(original_name: &str) -> Option<String> {
    // browsers may send a full client path as the file name
    let base = original_name.rsplit(['/', '\\']).next().unwrap_or(original_name);

    Path::new(base)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| ext.to_ascii_lowercase())
}
