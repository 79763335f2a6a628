// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Pixel and element formats understood by the resource layer.
//!
//! Formats here describe how a resource's contents are interpreted by
//! views and copies.  Buffers are `Unknown` unless viewed through a typed
//! SRV (the index buffer uses `Rgb32Uint`, one triangle per element).

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PixelFormat {
    #[default]
    Unknown,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Rgba16Float,
    R16Uint,
    R32Uint,
    Rgb32Uint,
    Rgb32Float,
    D32Float,
}

impl PixelFormat {
    /// Bytes per texel for formats that can back a texture, 0 otherwise.
    pub fn bytes_per_texel(self) -> u32 {
        match self {
            PixelFormat::Unknown => 0,
            PixelFormat::Rgba8Unorm | PixelFormat::Rgba8UnormSrgb | PixelFormat::Bgra8Unorm => 4,
            PixelFormat::Rgba16Float => 8,
            PixelFormat::R16Uint => 2,
            PixelFormat::R32Uint => 4,
            PixelFormat::Rgb32Uint | PixelFormat::Rgb32Float => 12,
            PixelFormat::D32Float => 4,
        }
    }
}
