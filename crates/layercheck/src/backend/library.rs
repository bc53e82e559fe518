use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use libloading::Library;
use tracing::debug;

use super::spec::{BackendError, BackendResult};

/// Extension libraries loaded into a context, kept open for its lifetime.
#[derive(Default)]
pub struct LibraryHandles {
    libraries: Mutex<Vec<(PathBuf, Library)>>,
}

impl LibraryHandles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens every path not loaded yet. Stops at the first failure.
    pub fn load(&self, paths: &[PathBuf]) -> BackendResult<()> {
        let mut libraries = self
            .libraries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for path in paths {
            if libraries.iter().any(|(loaded, _)| loaded == path) {
                continue;
            }
            // SAFETY: Loading runs the library's initializers. Extension
            // libraries are supplied by the operator configuring the run and
            // are trusted to be well-formed for this process.
            let library = unsafe { Library::new(path) }.map_err(|err| BackendError::Library {
                path: path.clone(),
                message: err.to_string(),
            })?;
            debug!(path = %path.display(), "loaded extension library");
            libraries.push((path.clone(), library));
        }
        Ok(())
    }

    pub fn is_loaded(&self, path: &Path) -> bool {
        self.libraries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|(loaded, _)| loaded == path)
    }

    pub fn len(&self) -> usize {
        self.libraries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
