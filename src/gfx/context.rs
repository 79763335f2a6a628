// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! The graphics context.
//!
//! Owns the device, the direct queue, one command list with one allocator
//! per frame slot, the resource registry, the descriptor heaps, the
//! per-frame upload arenas, the pipeline cache and the frame scheduler.
//! Construction order is explicit in [`GfxContext::new`]; everything the
//! context creates is destroyed when it drops, exactly once, through the
//! registry.
//!
//! The context comes out of `new` with an open command list so callers
//! can record one-time initialization (texture uploads, acceleration
//! structure builds) and flush it with [`GfxContext::flush_and_wait`]
//! before entering the frame loop.

use raw_window_handle::RawWindowHandle;

use crate::gfx::descriptors::{
    DescriptorHeap, NUM_CBV_SRV_UAV_CPU_DESCRIPTORS, NUM_CBV_SRV_UAV_GPU_DESCRIPTORS,
    NUM_DSV_DESCRIPTORS, NUM_RTV_DESCRIPTORS,
};
use crate::gfx::frame::FrameScheduler;
use crate::gfx::pipeline::{GraphicsPipelineState, PipelineCache, PipelineHandle, PipelineKind};
use crate::gfx::registry::{ResourceHandle, ResourceRegistry};
use crate::gfx::upload::{UploadAllocation, UploadArena};
use crate::imp;
use crate::pixel_formats::PixelFormat;
use crate::Error;

pub const SWAPCHAIN_BUFFER_COUNT: u32 = 4;

pub struct ContextConfig {
    pub resolution: (u32, u32),
    pub window: Option<RawWindowHandle>,
    pub create_depth_buffer: bool,
    pub device_options: imp::DeviceOptions,
}

impl Default for ContextConfig {
    fn default() -> Self {
        ContextConfig {
            resolution: (1920, 1080),
            window: None,
            create_depth_buffer: true,
            device_options: imp::DeviceOptions::default(),
        }
    }
}

pub struct GfxContext {
    device: imp::Device,
    queue: imp::Queue,
    cmdlist: imp::CommandList,
    cmd_allocators: [imp::CommandAllocator; 2],
    registry: ResourceRegistry,
    pipelines: PipelineCache,
    rtv_heap: DescriptorHeap,
    dsv_heap: DescriptorHeap,
    cpu_heap: DescriptorHeap,
    gpu_heaps: [DescriptorHeap; 2],
    upload_arenas: [UploadArena; 2],
    scheduler: FrameScheduler,
    swapchain: imp::Swapchain,
    back_buffers: [ResourceHandle; SWAPCHAIN_BUFFER_COUNT as usize],
    back_buffer_rtvs: imp::CpuDescriptor,
    depth_buffer: Option<(ResourceHandle, imp::CpuDescriptor)>,
    resolution: (u32, u32),
}

impl GfxContext {
    pub fn new(config: ContextConfig) -> Result<Self, Error> {
        let device = imp::Device::new(config.device_options)?;
        if !device.supports_raytracing() {
            return Err(Error::RaytracingUnsupported);
        }
        let (width, height) = config.resolution;
        let resolution = format!("{width}x{height}");
        logwise::info_sync!("creating graphics context at {resolution}", resolution = resolution);

        let queue = device.create_command_queue();
        let scheduler = FrameScheduler::new(&device);

        let mut rtv_heap = DescriptorHeap::new(
            &device,
            imp::DescriptorHeapKind::Rtv,
            NUM_RTV_DESCRIPTORS,
            false,
        );
        let mut dsv_heap = DescriptorHeap::new(
            &device,
            imp::DescriptorHeapKind::Dsv,
            NUM_DSV_DESCRIPTORS,
            false,
        );
        let cpu_heap = DescriptorHeap::new(
            &device,
            imp::DescriptorHeapKind::CbvSrvUav,
            NUM_CBV_SRV_UAV_CPU_DESCRIPTORS,
            false,
        );
        let gpu_heaps = [
            DescriptorHeap::new(
                &device,
                imp::DescriptorHeapKind::CbvSrvUav,
                NUM_CBV_SRV_UAV_GPU_DESCRIPTORS,
                true,
            ),
            DescriptorHeap::new(
                &device,
                imp::DescriptorHeapKind::CbvSrvUav,
                NUM_CBV_SRV_UAV_GPU_DESCRIPTORS,
                true,
            ),
        ];

        let mut registry = ResourceRegistry::new();

        let swapchain = device.create_swapchain(
            config.window,
            width,
            height,
            SWAPCHAIN_BUFFER_COUNT,
            PixelFormat::Rgba8Unorm,
        )?;
        let back_buffer_rtvs = rtv_heap.allocate(SWAPCHAIN_BUFFER_COUNT);
        let rtv_size = rtv_heap.raw().descriptor_size() as u64;
        let back_buffers = std::array::from_fn(|i| {
            let buffer = swapchain.take_buffer(i as u32);
            let rtv = imp::CpuDescriptor(back_buffer_rtvs.0 + i as u64 * rtv_size);
            device.create_render_target_view(&buffer, rtv);
            registry.add(buffer, imp::ResourceState::Present, PixelFormat::Rgba8Unorm)
        });

        let depth_buffer = if config.create_depth_buffer {
            let desc = imp::ResourceDesc {
                allow_depth_stencil: true,
                ..imp::ResourceDesc::texture_2d(PixelFormat::D32Float, width as u64, height, 1)
            };
            let texture =
                device.create_resource(imp::HeapType::Default, &desc, imp::ResourceState::DepthWrite)?;
            let dsv = dsv_heap.allocate(1);
            device.create_depth_stencil_view(&texture, dsv);
            let handle = registry.add(texture, imp::ResourceState::DepthWrite, PixelFormat::D32Float);
            Some((handle, dsv))
        } else {
            None
        };

        let cmd_allocators = [device.create_command_allocator(), device.create_command_allocator()];
        let mut cmdlist = device.create_command_list(&cmd_allocators[0]);
        cmdlist.record(imp::Command::SetDescriptorHeap {
            heap: gpu_heaps[0].raw().id(),
        });

        let upload_arenas = [UploadArena::new(&device)?, UploadArena::new(&device)?];

        Ok(GfxContext {
            device,
            queue,
            cmdlist,
            cmd_allocators,
            registry,
            pipelines: PipelineCache::new(),
            rtv_heap,
            dsv_heap,
            cpu_heap,
            gpu_heaps,
            upload_arenas,
            scheduler,
            swapchain,
            back_buffers,
            back_buffer_rtvs,
            depth_buffer,
            resolution: config.resolution,
        })
    }

    pub fn device(&self) -> &imp::Device {
        &self.device
    }

    pub fn queue(&self) -> &imp::Queue {
        &self.queue
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    pub fn frame_index(&self) -> u32 {
        self.scheduler.frame_index()
    }

    pub fn frames_in_flight(&self) -> u64 {
        self.scheduler.frames_in_flight()
    }

    // ---- resources ----

    /// Create a committed resource and register it.  The registry entry
    /// tracks `initial_state` from here on.
    pub fn create_resource(
        &mut self,
        heap: imp::HeapType,
        desc: &imp::ResourceDesc,
        initial_state: imp::ResourceState,
    ) -> Result<ResourceHandle, imp::Error> {
        let resource = self.device.create_resource(heap, desc, initial_state)?;
        Ok(self.registry.add(resource, initial_state, desc.format))
    }

    pub fn resource(&self, handle: ResourceHandle) -> &imp::RawResource {
        self.registry.get(handle)
    }

    pub fn resource_state(&self, handle: ResourceHandle) -> imp::ResourceState {
        self.registry.state(handle)
    }

    pub fn add_ref(&mut self, handle: ResourceHandle) -> u32 {
        self.registry.add_ref(handle)
    }

    pub fn release_resource(&mut self, handle: ResourceHandle) -> u32 {
        self.registry.release(handle)
    }

    pub fn live_resources(&self) -> usize {
        self.registry.live_count()
    }

    /// Record a transition barrier unless the resource is already in
    /// `state`.
    pub fn transition_barrier(&mut self, handle: ResourceHandle, state: imp::ResourceState) {
        self.registry.transition(&mut self.cmdlist, handle, state);
    }

    // ---- descriptors ----

    pub fn allocate_rtv_descriptors(&mut self, count: u32) -> imp::CpuDescriptor {
        self.rtv_heap.allocate(count)
    }

    pub fn allocate_dsv_descriptors(&mut self, count: u32) -> imp::CpuDescriptor {
        self.dsv_heap.allocate(count)
    }

    /// Persistent CBV/SRV/UAV staging descriptors, CPU-only.
    pub fn allocate_cpu_descriptors(&mut self, count: u32) -> imp::CpuDescriptor {
        self.cpu_heap.allocate(count)
    }

    /// Handle increment between consecutive CBV/SRV/UAV descriptors.
    pub fn cbv_srv_uav_descriptor_size(&self) -> u32 {
        self.cpu_heap.raw().descriptor_size()
    }

    /// Shader-visible descriptors valid for the current frame only.
    pub fn allocate_gpu_descriptors(&mut self, count: u32) -> imp::GpuDescriptorWrite {
        self.gpu_heaps[self.scheduler.frame_index() as usize].allocate_gpu(count)
    }

    /// Stage `count` descriptors from the CPU heap into this frame's
    /// shader-visible heap and return the table base.
    pub fn copy_descriptors_to_gpu_heap(
        &mut self,
        src: imp::CpuDescriptor,
        count: u32,
    ) -> imp::GpuDescriptor {
        let dest = self.allocate_gpu_descriptors(count);
        self.device.copy_descriptors(dest, src, count);
        dest.gpu
    }

    // ---- upload ----

    /// Carve a chunk out of the current frame's upload arena.
    pub fn upload(&self, size: u64) -> UploadAllocation<'_> {
        self.upload_arenas[self.scheduler.frame_index() as usize].allocate(size)
    }

    pub(crate) fn upload_arena(&self) -> &UploadArena {
        &self.upload_arenas[self.scheduler.frame_index() as usize]
    }

    // ---- pipelines ----

    pub fn create_graphics_pipeline(
        &mut self,
        vs: &[u8],
        ps: &[u8],
        state: &GraphicsPipelineState,
    ) -> Result<PipelineHandle, imp::Error> {
        self.pipelines
            .get_or_create_graphics(&self.device, vs, ps, state)
    }

    pub fn create_compute_pipeline(&mut self, cs: &[u8]) -> Result<PipelineHandle, imp::Error> {
        self.pipelines.get_or_create_compute(&self.device, cs)
    }

    pub fn release_pipeline(&mut self, handle: PipelineHandle) {
        self.pipelines.release(handle);
    }

    pub fn live_pipelines(&self) -> usize {
        self.pipelines.live_count()
    }

    /// Bind a cached pipeline and its root signature.
    pub fn set_pipeline(&mut self, handle: PipelineHandle) {
        let pipeline = self.pipelines.pipeline(handle).id();
        let root_signature = self.pipelines.root_signature(handle).id();
        self.cmdlist
            .record(imp::Command::SetPipeline { pipeline });
        self.cmdlist.record(match self.pipelines.kind(handle) {
            PipelineKind::Graphics => imp::Command::SetGraphicsRootSignature { root_signature },
            PipelineKind::Compute => imp::Command::SetComputeRootSignature { root_signature },
        });
    }

    // ---- command recording ----

    pub fn cmd(&mut self) -> &mut imp::CommandList {
        &mut self.cmdlist
    }

    // ---- frame lifecycle ----

    /// Top of the frame loop.  Resets this slot's allocator, command
    /// list, shader-visible heap and upload arena; the scheduler's
    /// throttle in `end_frame` proved the GPU finished with all of them.
    pub fn begin_frame(&mut self) {
        let frame = self.scheduler.frame_index() as usize;
        self.cmd_allocators[frame].reset();
        self.cmdlist.reset(&self.cmd_allocators[frame]);
        self.gpu_heaps[frame].reset();
        self.upload_arenas[frame].reset();

        let (width, height) = self.resolution;
        self.cmdlist.record(imp::Command::SetDescriptorHeap {
            heap: self.gpu_heaps[frame].raw().id(),
        });
        self.cmdlist.record(imp::Command::SetViewport {
            width: width as f32,
            height: height as f32,
        });
        self.cmdlist.record(imp::Command::SetScissor {
            left: 0,
            top: 0,
            right: width as i32,
            bottom: height as i32,
        });
    }

    /// Bottom of the frame loop: back buffer to present state, submit,
    /// present, throttle, flip the frame slot.
    pub fn end_frame(&mut self) {
        let back_buffer = self.back_buffer();
        self.transition_barrier(back_buffer, imp::ResourceState::Present);
        self.cmdlist.close();
        self.queue.execute(&mut self.cmdlist);
        self.swapchain.present();
        self.scheduler.end_frame(&self.queue);
    }

    /// Submit everything recorded so far and block until the GPU has
    /// executed it, then reopen the command list.  Used to flush one-time
    /// initialization before the first frame.
    pub fn flush_and_wait(&mut self) {
        self.cmdlist.close();
        self.queue.execute(&mut self.cmdlist);
        self.scheduler.wait_for_gpu(&self.queue);
        let frame = self.scheduler.frame_index() as usize;
        self.cmd_allocators[frame].reset();
        self.cmdlist.reset(&self.cmd_allocators[frame]);
    }

    /// Block until every submitted frame has retired.  The command list
    /// is left alone; call this between `end_frame` and teardown.
    pub fn wait_for_gpu(&mut self) {
        self.scheduler.wait_for_gpu(&self.queue);
    }

    // ---- swapchain ----

    pub fn back_buffer(&self) -> ResourceHandle {
        self.back_buffers[self.swapchain.current_back_buffer_index() as usize]
    }

    pub fn back_buffer_rtv(&self) -> imp::CpuDescriptor {
        let index = self.swapchain.current_back_buffer_index() as u64;
        let size = self.rtv_heap.raw().descriptor_size() as u64;
        imp::CpuDescriptor(self.back_buffer_rtvs.0 + index * size)
    }

    pub fn depth_buffer(&self) -> Option<ResourceHandle> {
        self.depth_buffer.map(|(handle, _)| handle)
    }

    pub fn depth_stencil_view(&self) -> Option<imp::CpuDescriptor> {
        self.depth_buffer.map(|(_, dsv)| dsv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> GfxContext {
        GfxContext::new(ContextConfig {
            resolution: (640, 480),
            ..ContextConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn construction_registers_swapchain_and_depth() {
        let ctx = context();
        // 4 back buffers, 1 depth buffer, 2 upload arenas live on the
        // device; the registry tracks the first five.
        assert_eq!(ctx.live_resources(), 5);
        assert!(ctx.depth_buffer().is_some());
        assert_eq!(ctx.resource_state(ctx.back_buffer()), imp::ResourceState::Present);
    }

    #[test]
    fn no_depth_buffer_when_not_requested() {
        let ctx = GfxContext::new(ContextConfig {
            create_depth_buffer: false,
            ..ContextConfig::default()
        })
        .unwrap();
        assert_eq!(ctx.live_resources(), 4);
        assert!(ctx.depth_stencil_view().is_none());
    }

    #[test]
    fn missing_raytracing_support_is_an_error() {
        let result = GfxContext::new(ContextConfig {
            device_options: imp::DeviceOptions {
                supports_raytracing: false,
            },
            ..ContextConfig::default()
        });
        assert!(matches!(result, Err(Error::RaytracingUnsupported)));
    }

    #[test]
    fn back_buffer_rtv_follows_the_swapchain_index() {
        let mut ctx = context();
        let first = ctx.back_buffer_rtv();
        ctx.begin_frame();
        ctx.end_frame();
        let second = ctx.back_buffer_rtv();
        assert_eq!(
            second.0 - first.0,
            ctx.rtv_heap.raw().descriptor_size() as u64
        );
        assert_ne!(ctx.back_buffer(), ctx.back_buffers[0]);
    }

    #[test]
    fn end_frame_presents_the_back_buffer() {
        let mut ctx = context();
        ctx.begin_frame();
        let back_buffer = ctx.back_buffer();
        ctx.transition_barrier(back_buffer, imp::ResourceState::RenderTarget);
        ctx.end_frame();
        assert_eq!(
            ctx.resource_state(back_buffer),
            imp::ResourceState::Present
        );
    }

    #[test]
    fn frame_loop_respects_the_throttle() {
        let mut ctx = context();
        for _ in 0..10 {
            ctx.begin_frame();
            ctx.end_frame();
            assert!(ctx.frames_in_flight() <= crate::gfx::MAX_FRAMES_IN_FLIGHT);
        }
        ctx.wait_for_gpu();
        assert_eq!(ctx.frames_in_flight(), 0);
    }

    #[test]
    fn upload_arena_resets_when_its_slot_returns() {
        let mut ctx = context();
        ctx.begin_frame();
        let offset_frame_0 = ctx.upload(1024).offset;
        ctx.end_frame();
        ctx.begin_frame();
        ctx.upload(1024);
        ctx.end_frame();
        // Back on slot 0; the arena must have been rewound.
        ctx.begin_frame();
        assert_eq!(ctx.upload(16).offset, offset_frame_0);
    }

    #[test]
    fn flush_and_wait_reopens_the_command_list() {
        let mut ctx = context();
        ctx.flush_and_wait();
        assert_eq!(ctx.frames_in_flight(), 0);
        // Recording after the flush must not panic.
        ctx.cmd().record(imp::Command::UavBarrier { resource: None });
    }

    #[test]
    fn pipeline_binding_sets_root_signature_by_kind() {
        let mut ctx = context();
        let pipeline = ctx.create_compute_pipeline(b"cs").unwrap();
        ctx.set_pipeline(pipeline);
        ctx.flush_and_wait();
        let executed = ctx.queue().executed();
        assert!(executed
            .iter()
            .any(|c| matches!(c, imp::Command::SetComputeRootSignature { .. })));
    }
}
