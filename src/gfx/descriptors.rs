// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Descriptor heap allocators.
//!
//! Four heap regions, all bump-allocated: render target views, depth
//! stencil views, a CPU-only staging region for persistent views, and two
//! shader-visible regions that are reset at the top of each frame.  There
//! is no free list.  Persistent descriptors live for the life of the
//! context; per-frame descriptors live for one frame.

use crate::imp;

pub const NUM_RTV_DESCRIPTORS: u32 = 1024;
pub const NUM_DSV_DESCRIPTORS: u32 = 1024;
pub const NUM_CBV_SRV_UAV_CPU_DESCRIPTORS: u32 = 16 * 1024;
pub const NUM_CBV_SRV_UAV_GPU_DESCRIPTORS: u32 = 16 * 1024;

pub struct DescriptorHeap {
    heap: imp::RawDescriptorHeap,
    descriptor_size: u32,
    capacity: u32,
    len: u32,
}

impl DescriptorHeap {
    pub fn new(
        device: &imp::Device,
        kind: imp::DescriptorHeapKind,
        capacity: u32,
        shader_visible: bool,
    ) -> Self {
        let heap = device.create_descriptor_heap(imp::DescriptorHeapDesc {
            kind,
            capacity,
            shader_visible,
        });
        let descriptor_size = heap.descriptor_size();
        DescriptorHeap {
            heap,
            descriptor_size,
            capacity,
            len: 0,
        }
    }

    pub fn raw(&self) -> &imp::RawDescriptorHeap {
        &self.heap
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocate `count` consecutive descriptors, returning the CPU handle
    /// of the first.
    pub fn allocate(&mut self, count: u32) -> imp::CpuDescriptor {
        assert!(count > 0, "empty descriptor allocation");
        assert!(
            self.len + count <= self.capacity,
            "descriptor heap is full"
        );
        let handle =
            imp::CpuDescriptor(self.heap.cpu_start().0 + self.len as u64 * self.descriptor_size as u64);
        self.len += count;
        handle
    }

    /// Allocate on a shader-visible heap, returning both handle flavors
    /// for the first descriptor.
    pub fn allocate_gpu(&mut self, count: u32) -> imp::GpuDescriptorWrite {
        let offset = self.len as u64 * self.descriptor_size as u64;
        let cpu = self.allocate(count);
        imp::GpuDescriptorWrite {
            cpu,
            gpu: imp::GpuDescriptor(self.heap.gpu_start().0 + offset),
        }
    }

    /// Forget every allocation.  Only meaningful on the per-frame
    /// shader-visible heaps; callers guarantee the GPU is done with them.
    pub fn reset(&mut self) {
        self.len = 0;
    }
}
