// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Precompiled shader blobs.
//!
//! Shaders ship compiled; at runtime they are opaque bytes loaded from a
//! data directory and handed to the pipeline cache or the state object
//! builder.  Nothing here parses them.

use std::path::{Path, PathBuf};

use crate::Error;

pub struct ShaderLibrary {
    root: PathBuf,
}

impl ShaderLibrary {
    /// `root` is the directory holding the compiled blobs, typically
    /// `Data/Shaders` next to the executable.
    pub fn new(root: impl AsRef<Path>) -> Self {
        ShaderLibrary {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn load(&self, name: &str) -> Result<Vec<u8>, Error> {
        let path = self.root.join(name);
        std::fs::read(&path).map_err(|source| Error::ShaderLoad { path, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_blob_bytes_verbatim() {
        let dir = std::env::temp_dir().join("shader_library_test");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("test.cso"), [0xde, 0xad, 0xbe, 0xef]).unwrap();
        let library = ShaderLibrary::new(&dir);
        assert_eq!(library.load("test.cso").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn missing_blob_reports_its_path() {
        let library = ShaderLibrary::new("/nonexistent");
        let err = library.load("missing.cso").unwrap_err();
        assert!(err.to_string().contains("missing.cso"));
    }
}
