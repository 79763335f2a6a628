// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Fatal configuration errors.
//!
//! Only environment problems the user can fix are reported as values:
//! missing raytracing hardware, a missing shader blob, a device that cannot
//! be created.  Resource-pool exhaustion and failed native calls are
//! programming or provisioning bugs against fixed-size-by-design pools and
//! trap immediately via `assert!` instead of threading a `Result` through
//! every allocation site.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The device exists but reports no raytracing support.  There is no
    /// fallback path; the caller is expected to tell the user and exit.
    #[error("this application requires a GPU with raytracing support")]
    RaytracingUnsupported,
    #[error("failed to load shader blob {}: {source}", path.display())]
    ShaderLoad {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] png::DecodingError),
    #[error("unsupported texture format: {0}")]
    UnsupportedTexture(&'static str),
    /// Cross-reference problems in externally produced scene data: a
    /// section naming a material that does not exist, an index range past
    /// the end of the index buffer, and the like.
    #[error("scene data is inconsistent: {0}")]
    InvalidScene(&'static str),
    #[error(transparent)]
    Device(#[from] crate::imp::Error),
}
