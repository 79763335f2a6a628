// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Content-hashed pipeline cache.
//!
//! Pipelines are keyed by a 64-bit hash of everything that feeds their
//! creation: shader bytecode and fixed-function state.  Asking for the
//! same inputs twice returns the same handle without touching the device.
//! Compiled pipelines live in a fixed 64-slot pool; the root signature is
//! derived from the shader bytecode and owned alongside the pipeline.
//!
//! A released pipeline leaves its hash entry behind.  The entry is
//! detected stale on the next lookup (the generation no longer matches)
//! and evicted when its slot is reassigned.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};

use crate::imp;
use crate::pixel_formats::PixelFormat;

pub const MAX_PIPELINES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineHandle {
    index: u16,
    generation: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    Graphics,
    Compute,
}

/// Fixed-function state that participates in the pipeline hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphicsPipelineState {
    pub depth_test: bool,
    pub alpha_blend: bool,
    pub rtv_format: PixelFormat,
    pub dsv_format: PixelFormat,
}

impl Default for GraphicsPipelineState {
    fn default() -> Self {
        GraphicsPipelineState {
            depth_test: false,
            alpha_blend: false,
            rtv_format: PixelFormat::Rgba8Unorm,
            dsv_format: PixelFormat::Unknown,
        }
    }
}

struct Slot {
    pipeline: Option<Compiled>,
    generation: u16,
}

struct Compiled {
    pipeline: imp::RawPipelineState,
    root_signature: imp::RawRootSignature,
    kind: PipelineKind,
}

pub struct PipelineCache {
    slots: Vec<Slot>,
    by_hash: HashMap<u64, PipelineHandle>,
}

impl PipelineCache {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_PIPELINES);
        for _ in 0..MAX_PIPELINES {
            slots.push(Slot {
                pipeline: None,
                generation: 0,
            });
        }
        PipelineCache {
            slots,
            by_hash: HashMap::new(),
        }
    }

    pub fn get_or_create_graphics(
        &mut self,
        device: &imp::Device,
        vs: &[u8],
        ps: &[u8],
        state: &GraphicsPipelineState,
    ) -> Result<PipelineHandle, imp::Error> {
        let mut hasher = DefaultHasher::new();
        vs.hash(&mut hasher);
        ps.hash(&mut hasher);
        state.hash(&mut hasher);
        let hash = hasher.finish();

        if let Some(handle) = self.lookup(hash) {
            return Ok(handle);
        }
        logwise::info_sync!(
            "pipeline cache miss, compiling graphics pipeline {hash}",
            hash = hash
        );
        // The root signature is embedded in the vertex shader bytecode.
        let root_signature = device.create_root_signature_from_bytecode(vs)?;
        let pipeline = device.create_graphics_pipeline(vs, ps, &root_signature)?;
        Ok(self.insert(
            hash,
            Compiled {
                pipeline,
                root_signature,
                kind: PipelineKind::Graphics,
            },
        ))
    }

    pub fn get_or_create_compute(
        &mut self,
        device: &imp::Device,
        cs: &[u8],
    ) -> Result<PipelineHandle, imp::Error> {
        let mut hasher = DefaultHasher::new();
        cs.hash(&mut hasher);
        let hash = hasher.finish();

        if let Some(handle) = self.lookup(hash) {
            return Ok(handle);
        }
        logwise::info_sync!(
            "pipeline cache miss, compiling compute pipeline {hash}",
            hash = hash
        );
        let root_signature = device.create_root_signature_from_bytecode(cs)?;
        let pipeline = device.create_compute_pipeline(cs, &root_signature)?;
        Ok(self.insert(
            hash,
            Compiled {
                pipeline,
                root_signature,
                kind: PipelineKind::Compute,
            },
        ))
    }

    fn lookup(&self, hash: u64) -> Option<PipelineHandle> {
        let handle = *self.by_hash.get(&hash)?;
        self.is_valid(handle).then_some(handle)
    }

    fn insert(&mut self, hash: u64, compiled: Compiled) -> PipelineHandle {
        let index = self
            .slots
            .iter()
            .position(|slot| slot.pipeline.is_none())
            .expect("pipeline pool is full");
        // Hash entries from earlier tenants of this slot are stale now;
        // drop them before the index points at a different pipeline.
        self.by_hash
            .retain(|_, handle| handle.index as usize != index);
        let slot = &mut self.slots[index];
        slot.pipeline = Some(compiled);
        let handle = PipelineHandle {
            index: index as u16,
            generation: slot.generation,
        };
        self.by_hash.insert(hash, handle);
        handle
    }

    pub fn is_valid(&self, handle: PipelineHandle) -> bool {
        let slot = &self.slots[handle.index as usize];
        slot.pipeline.is_some() && slot.generation == handle.generation
    }

    fn slot(&self, handle: PipelineHandle) -> &Compiled {
        let slot = &self.slots[handle.index as usize];
        assert!(
            slot.pipeline.is_some() && slot.generation == handle.generation,
            "stale or invalid pipeline handle"
        );
        slot.pipeline.as_ref().unwrap()
    }

    pub fn pipeline(&self, handle: PipelineHandle) -> &imp::RawPipelineState {
        &self.slot(handle).pipeline
    }

    pub fn root_signature(&self, handle: PipelineHandle) -> &imp::RawRootSignature {
        &self.slot(handle).root_signature
    }

    pub fn kind(&self, handle: PipelineHandle) -> PipelineKind {
        self.slot(handle).kind
    }

    /// Destroy a pipeline.  Its hash entry is left to lazy eviction.
    pub fn release(&mut self, handle: PipelineHandle) {
        assert!(self.is_valid(handle), "stale or invalid pipeline handle");
        let slot = &mut self.slots[handle.index as usize];
        slot.pipeline = None;
        slot.generation = slot.generation.wrapping_add(1);
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.pipeline.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imp::{Device, DeviceOptions};

    fn device() -> Device {
        Device::new(DeviceOptions::default()).unwrap()
    }

    #[test]
    fn identical_inputs_share_one_pipeline() {
        let device = device();
        let mut cache = PipelineCache::new();
        let state = GraphicsPipelineState::default();
        let a = cache
            .get_or_create_graphics(&device, b"vs", b"ps", &state)
            .unwrap();
        let b = cache
            .get_or_create_graphics(&device, b"vs", b"ps", &state)
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(cache.live_count(), 1);
    }

    #[test]
    fn state_changes_miss_the_cache() {
        let device = device();
        let mut cache = PipelineCache::new();
        let opaque = GraphicsPipelineState::default();
        let blended = GraphicsPipelineState {
            alpha_blend: true,
            ..opaque
        };
        let a = cache
            .get_or_create_graphics(&device, b"vs", b"ps", &opaque)
            .unwrap();
        let b = cache
            .get_or_create_graphics(&device, b"vs", b"ps", &blended)
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(cache.live_count(), 2);
    }

    #[test]
    fn released_handle_is_stale_and_recreation_works() {
        let device = device();
        let mut cache = PipelineCache::new();
        let handle = cache.get_or_create_compute(&device, b"cs").unwrap();
        cache.release(handle);
        assert!(!cache.is_valid(handle));
        // Same inputs after release must compile a fresh pipeline, not
        // resurrect the stale map entry.
        let again = cache.get_or_create_compute(&device, b"cs").unwrap();
        assert_ne!(handle, again);
        assert!(cache.is_valid(again));
    }

    #[test]
    fn slot_reuse_evicts_stale_hash_entries() {
        let device = device();
        let mut cache = PipelineCache::new();
        let old = cache.get_or_create_compute(&device, b"old").unwrap();
        cache.release(old);
        // Different inputs land in the freed slot 0.
        let new = cache.get_or_create_compute(&device, b"new").unwrap();
        assert!(cache.is_valid(new));
        // The old hash must now miss and compile into a different slot.
        let old_again = cache.get_or_create_compute(&device, b"old").unwrap();
        assert_ne!(old_again, new);
        assert!(cache.is_valid(old_again));
        assert_eq!(cache.live_count(), 2);
    }

    #[test]
    #[should_panic(expected = "pool is full")]
    fn pool_overflow_traps() {
        let device = device();
        let mut cache = PipelineCache::new();
        for i in 0..=MAX_PIPELINES {
            cache
                .get_or_create_compute(&device, format!("cs{i}").as_bytes())
                .unwrap();
        }
    }
}
