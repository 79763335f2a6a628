// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Backend seam.
//!
//! Everything above this module talks to the GPU through the types exported
//! here.  Exactly one backend feature must be enabled; the backend's types
//! are re-exported wholesale so callers write `imp::Device`, `imp::Fence`
//! and so on without naming the backend.

#[cfg(feature = "backend_headless")]
mod headless;
#[cfg(feature = "backend_headless")]
pub use headless::*;

#[cfg(not(any(feature = "backend_headless")))]
compile_error!("no backend feature enabled; build with `backend_headless`");
