use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Extension of a light sequence stored next to its audio file.
pub const SEQUENCE_EXT: &str = "bin";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid file name {0:?}")]
    InvalidName(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Flat directory of uploaded audio files and their `.bin` light sequences.
#[derive(Debug, Clone)]
pub struct AudioStore {
    root: PathBuf,
}

fn validate_name(name: &str) -> Result<(), StoreError> {
    let bad = name.is_empty()
        || name.contains("..")
        || name.contains(['/', '\\', '\0'])
        || Path::new(name).is_absolute();
    if bad {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

impl AudioStore {
    /// Use `root`, creating it if needed.
    pub async fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, name: &str) -> Result<PathBuf, StoreError> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    pub async fn save(&self, name: &str, data: &[u8]) -> Result<PathBuf, StoreError> {
        let path = self.path(name)?;
        tokio::fs::write(&path, data).await?;
        log::info!("Stored {} ({} bytes)", path.display(), data.len());
        Ok(path)
    }

    /// Raw bytes of the light sequence that belongs to `name`.
    pub async fn load_sequence_bytes(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        let file = format!("{}.{}", name, SEQUENCE_EXT);
        let path = self.path(&file)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound(file)),
            Err(err) => Err(err.into()),
        }
    }

    /// Stored audio files, sorted by name. Sequences are not listed.
    pub async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !name.ends_with(&format!(".{}", SEQUENCE_EXT)) {
                files.push(name);
            }
        }
        files.sort();
        Ok(files)
    }
}
