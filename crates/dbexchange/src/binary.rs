//! Binary payload store.
//!
//! Bytea columns never travel inside the JSON data file: each payload is
//! written to its own file in a dedicated folder, named after the owning
//! table, the column, and the row's business key value so the file stays
//! addressable on the target side where technical keys differ.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{ExchangeError, Result};

#[derive(Debug, Clone)]
pub struct BinaryStore {
    folder: PathBuf,
}

impl BinaryStore {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        BinaryStore {
            folder: folder.into(),
        }
    }

    #[must_use]
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.folder.is_dir()
    }

    /// Create the folder if absent, owner-only on unix.
    pub fn ensure_folder(&self) -> Result<()> {
        if self.folder.is_dir() {
            return Ok(());
        }
        fs::create_dir_all(&self.folder)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.folder, fs::Permissions::from_mode(0o700))?;
        }
        Ok(())
    }

    /// Path of the payload file for one column of one row.
    #[must_use]
    pub fn path_for(&self, table_name: &str, field: &str, business_value: &str) -> PathBuf {
        // Schema-qualified names would otherwise create a subdirectory.
        let table = table_name.replace('.', "_");
        self.folder
            .join(format!("{}-{}-{}.bin", table, field, business_value))
    }

    /// Store one payload, returning the bare file name recorded in the data
    /// file.
    pub fn write(
        &self,
        table_name: &str,
        field: &str,
        business_value: &str,
        payload: &[u8],
    ) -> Result<String> {
        self.ensure_folder()?;
        let path = self.path_for(table_name, field, business_value);
        fs::write(&path, payload)?;
        debug!(path = %path.display(), bytes = payload.len(), "binary payload written");
        Ok(file_name_of(&path))
    }

    /// Read back one payload; `Ok(None)` when the file is absent, so the
    /// importer can leave the column untouched.
    pub fn read(&self, table_name: &str, field: &str, business_value: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(table_name, field, business_value);
        if !path.is_file() {
            return Ok(None);
        }
        let payload = fs::read(&path).map_err(|source| {
            ExchangeError::import(format!(
                "unable to read the binary file {}: {}",
                path.display(),
                source
            ))
        })?;
        Ok(Some(payload))
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
