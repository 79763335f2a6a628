// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! The resource and frame lifecycle layer.
//!
//! [`GfxContext`] is the owner of everything with a GPU lifetime: the
//! device and queue, the resource registry, the descriptor heaps, the
//! per-frame upload arenas, the pipeline cache and the frame scheduler.
//! It is constructed explicitly and passed by reference; there are no
//! singletons.

mod context;
mod descriptors;
mod frame;
mod pipeline;
mod registry;
mod upload;

pub use context::{ContextConfig, GfxContext, SWAPCHAIN_BUFFER_COUNT};
pub use descriptors::{
    DescriptorHeap, NUM_CBV_SRV_UAV_CPU_DESCRIPTORS, NUM_CBV_SRV_UAV_GPU_DESCRIPTORS,
    NUM_DSV_DESCRIPTORS, NUM_RTV_DESCRIPTORS,
};
pub use frame::{FrameScheduler, MAX_FRAMES_IN_FLIGHT};
pub use pipeline::{
    GraphicsPipelineState, PipelineCache, PipelineHandle, PipelineKind, MAX_PIPELINES,
};
pub use registry::{ResourceHandle, ResourceRegistry, MAX_RESOURCES};
pub use upload::{UploadAllocation, UploadArena, UPLOAD_ALLOC_ALIGNMENT, UPLOAD_ARENA_CAPACITY};
