// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Per-frame upload arenas.
//!
//! One 8 MiB persistently mapped upload buffer per frame slot, carved out
//! linearly in 256-byte-aligned chunks.  An allocation is valid for
//! exactly one frame; the arena is reset wholesale when its frame slot
//! comes around again, after the scheduler has proven the GPU finished
//! reading it.

use std::cell::Cell;

use crate::imp;

pub const UPLOAD_ARENA_CAPACITY: u64 = 8 * 1024 * 1024;
pub const UPLOAD_ALLOC_ALIGNMENT: u64 = 256;

pub struct UploadArena {
    buffer: imp::RawResource,
    offset: Cell<u64>,
}

/// One chunk of upload memory: CPU-writable now, GPU-readable this frame.
pub struct UploadAllocation<'a> {
    buffer: &'a imp::RawResource,
    /// Byte offset of the chunk within the arena buffer.
    pub offset: u64,
    /// Aligned size actually reserved.
    pub size: u64,
    /// GPU virtual address of the chunk.
    pub gpu_address: u64,
}

impl UploadArena {
    pub fn new(device: &imp::Device) -> Result<Self, imp::Error> {
        let buffer = device.create_resource(
            imp::HeapType::Upload,
            &imp::ResourceDesc::buffer(UPLOAD_ARENA_CAPACITY),
            imp::ResourceState::GenericRead,
        )?;
        Ok(UploadArena {
            buffer,
            offset: Cell::new(0),
        })
    }

    pub fn buffer(&self) -> &imp::RawResource {
        &self.buffer
    }

    pub fn used(&self) -> u64 {
        self.offset.get()
    }

    /// Reserve `size` bytes.  Both the returned offset and the reserved
    /// size are rounded up to 256 bytes so any chunk can back a constant
    /// buffer view.  Exhausting the arena mid-frame traps.
    pub fn allocate(&self, size: u64) -> UploadAllocation<'_> {
        assert!(size > 0, "empty upload allocation");
        let aligned = (size + UPLOAD_ALLOC_ALIGNMENT - 1) & !(UPLOAD_ALLOC_ALIGNMENT - 1);
        let offset = self.offset.get();
        assert!(
            offset + aligned <= UPLOAD_ARENA_CAPACITY,
            "upload arena is full"
        );
        self.offset.set(offset + aligned);
        UploadAllocation {
            buffer: &self.buffer,
            offset,
            size: aligned,
            gpu_address: self.buffer.gpu_address() + offset,
        }
    }

    pub fn reset(&self) {
        self.offset.set(0);
    }
}

impl UploadAllocation<'_> {
    /// Id of the arena buffer backing this chunk, for copy commands.
    pub fn buffer_id(&self) -> u64 {
        self.buffer.id()
    }

    pub fn write(&self, bytes: &[u8]) {
        self.write_at(0, bytes);
    }

    pub fn write_at(&self, rel_offset: u64, bytes: &[u8]) {
        assert!(
            rel_offset + bytes.len() as u64 <= self.size,
            "write past the end of an upload allocation"
        );
        self.buffer
            .write((self.offset + rel_offset) as usize, bytes);
    }

    pub fn write_pod<T: bytemuck::Pod>(&self, value: &T) {
        self.write(bytemuck::bytes_of(value));
    }

    pub fn write_slice<T: bytemuck::Pod>(&self, values: &[T]) {
        self.write(bytemuck::cast_slice(values));
    }
}
