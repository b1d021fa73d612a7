//! Persistence of the chosen provider id.
use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use flagswitch_core::Result;

/// Storage for a single string: the id of the provider the user picked.
///
/// Stored ids are returned as written. Normalizing legacy ids is up to the caller.
pub trait ChoiceStore: Send + Sync {
    /// Read the stored provider id. Returns `None` if nothing is stored or it cannot be read.
    fn load(&self) -> Option<String>;

    /// Store a provider id.
    fn save(&self, provider_id: &str) -> Result<()>;
}

/// A choice store that keeps the choice in memory for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryChoiceStore {
    choice: Mutex<Option<String>>,
}

impl MemoryChoiceStore {
    pub fn new() -> MemoryChoiceStore {
        MemoryChoiceStore::default()
    }

    /// Create a store that already holds `provider_id`.
    pub fn with_choice(provider_id: impl Into<String>) -> MemoryChoiceStore {
        MemoryChoiceStore {
            choice: Mutex::new(Some(provider_id.into())),
        }
    }
}

impl ChoiceStore for MemoryChoiceStore {
    fn load(&self) -> Option<String> {
        self.choice
            .lock()
            .expect("thread holding choice lock should not panic")
            .clone()
    }

    fn save(&self, provider_id: &str) -> Result<()> {
        *self
            .choice
            .lock()
            .expect("thread holding choice lock should not panic") = Some(provider_id.to_owned());
        Ok(())
    }
}

/// A choice store backed by a small text file holding the provider id.
#[derive(Debug, Clone)]
pub struct FileChoiceStore {
    path: PathBuf,
}

impl FileChoiceStore {
    pub fn new(path: impl Into<PathBuf>) -> FileChoiceStore {
        FileChoiceStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ChoiceStore for FileChoiceStore {
    fn load(&self) -> Option<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Some(contents.trim().to_owned()).filter(|id| !id.is_empty()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => {
                log::warn!(target: "flagswitch", path:? = self.path; "failed to read stored provider choice: {err}");
                None
            }
        }
    }

    fn save(&self, provider_id: &str) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, provider_id)?;
        Ok(())
    }
}
