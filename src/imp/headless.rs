// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Software device.
//!
//! This backend never touches a GPU.  It hands out opaque ids for every
//! native object, records every command into a list the caller can read
//! back, and models fence completion pessimistically: a fence value becomes
//! completed only when somebody waits on it.  That is the worst case the
//! frame throttle has to bound, so tests against this backend exercise the
//! real blocking structure of the code above it.
//!
//! Upload-heap resources carry real CPU memory and support reads and
//! writes; default-heap resources are ids with a size.  Copies between
//! them are recorded, not performed.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use raw_window_handle::RawWindowHandle;

use crate::pixel_formats::PixelFormat;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no suitable graphics device is available")]
    NoDevice,
    #[error("resource description is not representable: {0}")]
    BadResourceDesc(&'static str),
}

/// Resource states a transition barrier can move between.
///
/// The set mirrors what the command recorder actually uses; there is no
/// combined-flags representation, a resource is in exactly one state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Common,
    GenericRead,
    CopyDest,
    CopySource,
    UnorderedAccess,
    NonPixelShaderResource,
    PixelShaderResource,
    RenderTarget,
    DepthWrite,
    Present,
    RaytracingAccelerationStructure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapType {
    /// Device-local memory, not CPU-visible.
    Default,
    /// CPU-visible write-combined memory, persistently mapped.
    Upload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Buffer,
    Texture2d,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceDesc {
    pub kind: ResourceKind,
    pub width: u64,
    pub height: u32,
    pub mip_levels: u16,
    pub format: PixelFormat,
    pub allow_unordered_access: bool,
    pub allow_render_target: bool,
    pub allow_depth_stencil: bool,
}

impl ResourceDesc {
    pub fn buffer(size: u64) -> Self {
        ResourceDesc {
            kind: ResourceKind::Buffer,
            width: size,
            height: 1,
            mip_levels: 1,
            format: PixelFormat::Unknown,
            allow_unordered_access: false,
            allow_render_target: false,
            allow_depth_stencil: false,
        }
    }

    pub fn buffer_uav(size: u64) -> Self {
        ResourceDesc {
            allow_unordered_access: true,
            ..Self::buffer(size)
        }
    }

    pub fn texture_2d(format: PixelFormat, width: u64, height: u32, mip_levels: u16) -> Self {
        ResourceDesc {
            kind: ResourceKind::Texture2d,
            width,
            height,
            mip_levels,
            format,
            allow_unordered_access: false,
            allow_render_target: false,
            allow_depth_stencil: false,
        }
    }

    /// Total allocation size in bytes, mips included.
    pub fn byte_size(&self) -> u64 {
        match self.kind {
            ResourceKind::Buffer => self.width,
            ResourceKind::Texture2d => {
                let bpp = self.format.bytes_per_texel() as u64;
                let mut total = 0;
                let mut w = self.width;
                let mut h = self.height as u64;
                for _ in 0..self.mip_levels {
                    total += w.max(1) * h.max(1) * bpp;
                    w /= 2;
                    h /= 2;
                }
                total
            }
        }
    }
}

/// CPU-side descriptor handle.  Plain address arithmetic, like the native
/// handles it stands in for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CpuDescriptor(pub u64);

/// Shader-visible descriptor handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpuDescriptor(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorHeapKind {
    CbvSrvUav,
    Rtv,
    Dsv,
}

#[derive(Debug, Clone, Copy)]
pub struct DescriptorHeapDesc {
    pub kind: DescriptorHeapKind,
    pub capacity: u32,
    pub shader_visible: bool,
}

pub struct RawDescriptorHeap {
    id: u64,
    desc: DescriptorHeapDesc,
    cpu_base: u64,
    gpu_base: u64,
}

impl RawDescriptorHeap {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn desc(&self) -> DescriptorHeapDesc {
        self.desc
    }

    pub fn descriptor_size(&self) -> u32 {
        match self.desc.kind {
            DescriptorHeapKind::CbvSrvUav => 32,
            DescriptorHeapKind::Rtv | DescriptorHeapKind::Dsv => 16,
        }
    }

    pub fn cpu_start(&self) -> CpuDescriptor {
        CpuDescriptor(self.cpu_base)
    }

    /// Shader-visible base.  Panics on a CPU-only heap, which is always a
    /// caller bug.
    pub fn gpu_start(&self) -> GpuDescriptor {
        assert!(self.desc.shader_visible, "heap is not shader-visible");
        GpuDescriptor(self.gpu_base)
    }
}

/// Shader resource view description.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SrvDesc {
    /// Typed or structured buffer view.  `stride` is zero for typed views;
    /// `format` is `Unknown` for structured views.
    Buffer {
        format: PixelFormat,
        first_element: u64,
        element_count: u32,
        stride: u32,
    },
    Texture2d {
        format: PixelFormat,
        mip_levels: u32,
    },
    AccelerationStructure {
        gpu_address: u64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewKind {
    Srv(SrvDesc),
    Uav,
    Rtv,
    Dsv,
    Cbv { gpu_address: u64, size: u32 },
}

/// One descriptor write, kept for inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewRecord {
    pub resource: Option<u64>,
    pub kind: ViewKind,
    pub dest: CpuDescriptor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccelKind {
    BottomLevel,
    TopLevel,
}

/// One triangle geometry feeding a bottom-level build.
#[derive(Debug, Clone, Copy)]
pub struct GeometryDesc {
    pub vertex_buffer_address: u64,
    pub vertex_count: u32,
    pub vertex_stride: u32,
    pub index_buffer_address: u64,
    pub index_count: u32,
    /// 0 means no per-geometry transform.
    pub transform_address: u64,
}

pub enum AccelInputs<'a> {
    BottomLevel(&'a [GeometryDesc]),
    TopLevel {
        instance_buffer_address: u64,
        instance_count: u32,
    },
}

impl AccelInputs<'_> {
    pub fn kind(&self) -> AccelKind {
        match self {
            AccelInputs::BottomLevel(_) => AccelKind::BottomLevel,
            AccelInputs::TopLevel { .. } => AccelKind::TopLevel,
        }
    }

    /// Geometry count for a bottom-level build, instance count for a
    /// top-level build.
    pub fn entry_count(&self) -> u32 {
        match self {
            AccelInputs::BottomLevel(geometries) => geometries.len() as u32,
            AccelInputs::TopLevel { instance_count, .. } => *instance_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrebuildInfo {
    pub result_size: u64,
    pub scratch_size: u64,
}

/// Instance record consumed by a top-level build.  Layout is the 64-byte
/// wire format the build command reads from GPU memory.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RaytracingInstance {
    /// Row-major 3x4 object-to-world transform.
    pub transform: [[f32; 4]; 3],
    /// Low 24 bits instance id, high 8 bits visibility mask.
    pub instance_id_and_mask: u32,
    /// Low 24 bits hit-group table offset, high 8 bits flags.
    pub contribution_and_flags: u32,
    pub acceleration_structure: u64,
}

/// Everything a command list can record.  The executed stream is the
/// backend's observable output.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Transition {
        resource: u64,
        from: ResourceState,
        to: ResourceState,
    },
    UavBarrier {
        resource: Option<u64>,
    },
    CopyBufferRegion {
        dst: u64,
        dst_offset: u64,
        src: u64,
        src_offset: u64,
        size: u64,
    },
    CopyBufferToTexture {
        dst: u64,
        dst_mip: u32,
        src: u64,
        src_offset: u64,
        row_pitch: u32,
    },
    CopyResource {
        dst: u64,
        src: u64,
    },
    CopyTextureRegion {
        dst: u64,
        dst_mip: u32,
        src: u64,
        src_mip: u32,
    },
    SetDescriptorHeap {
        heap: u64,
    },
    SetPipeline {
        pipeline: u64,
    },
    SetStateObject {
        state_object: u64,
    },
    SetGraphicsRootSignature {
        root_signature: u64,
    },
    SetComputeRootSignature {
        root_signature: u64,
    },
    SetGraphicsRootCbv {
        index: u32,
        gpu_address: u64,
    },
    SetComputeRootCbv {
        index: u32,
        gpu_address: u64,
    },
    SetGraphicsRootTable {
        index: u32,
        base: GpuDescriptor,
    },
    SetComputeRootTable {
        index: u32,
        base: GpuDescriptor,
    },
    SetViewport {
        width: f32,
        height: f32,
    },
    SetScissor {
        left: i32,
        top: i32,
        right: i32,
        bottom: i32,
    },
    SetRenderTargets {
        rtv: CpuDescriptor,
        dsv: Option<CpuDescriptor>,
    },
    ClearRenderTarget {
        rtv: CpuDescriptor,
    },
    ClearDepth {
        dsv: CpuDescriptor,
    },
    SetVertexBuffer {
        gpu_address: u64,
        size: u32,
        stride: u32,
    },
    SetIndexBuffer {
        gpu_address: u64,
        size: u32,
        format: PixelFormat,
    },
    DrawIndexed {
        index_count: u32,
        first_index: u32,
        base_vertex: i32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    DispatchRays {
        ray_gen_address: u64,
        miss_address: u64,
        miss_size: u64,
        miss_stride: u64,
        hit_group_address: u64,
        hit_group_size: u64,
        hit_group_stride: u64,
        width: u32,
        height: u32,
    },
    BuildAccelerationStructure {
        kind: AccelKind,
        dest_address: u64,
        scratch_address: u64,
        entry_count: u32,
    },
}

struct DeviceShared {
    next_id: Cell<u64>,
    supports_raytracing: bool,
    live_resources: Cell<usize>,
    views: RefCell<Vec<ViewRecord>>,
}

impl DeviceShared {
    fn next_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DeviceOptions {
    pub supports_raytracing: bool,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        DeviceOptions {
            supports_raytracing: true,
        }
    }
}

pub struct Device {
    shared: Rc<DeviceShared>,
}

impl Device {
    pub fn new(options: DeviceOptions) -> Result<Device, Error> {
        Ok(Device {
            shared: Rc::new(DeviceShared {
                next_id: Cell::new(1),
                supports_raytracing: options.supports_raytracing,
                live_resources: Cell::new(0),
                views: RefCell::new(Vec::new()),
            }),
        })
    }

    pub fn supports_raytracing(&self) -> bool {
        self.shared.supports_raytracing
    }

    /// Number of resources created and not yet dropped.  Swapchain buffers
    /// count from the moment they are taken.
    pub fn live_resource_count(&self) -> usize {
        self.shared.live_resources.get()
    }

    pub fn create_resource(
        &self,
        heap: HeapType,
        desc: &ResourceDesc,
        initial_state: ResourceState,
    ) -> Result<RawResource, Error> {
        if desc.byte_size() == 0 {
            return Err(Error::BadResourceDesc("zero-sized resource"));
        }
        let memory = match heap {
            HeapType::Default => None,
            HeapType::Upload => {
                if desc.kind != ResourceKind::Buffer {
                    return Err(Error::BadResourceDesc("upload heap holds buffers only"));
                }
                Some(RefCell::new(vec![0u8; desc.byte_size() as usize]))
            }
        };
        let id = self.shared.next_id();
        self.shared
            .live_resources
            .set(self.shared.live_resources.get() + 1);
        Ok(RawResource {
            shared: Rc::clone(&self.shared),
            id,
            desc: *desc,
            initial_state,
            // Non-overlapping address ranges per resource; offsets within a
            // resource stay attributable to it.
            gpu_address: id << 32,
            memory,
        })
    }

    pub fn create_descriptor_heap(&self, desc: DescriptorHeapDesc) -> RawDescriptorHeap {
        let id = self.shared.next_id();
        RawDescriptorHeap {
            id,
            desc,
            cpu_base: id << 32,
            gpu_base: (id << 32) | 1 << 31,
        }
    }

    pub fn create_shader_resource_view(
        &self,
        resource: Option<&RawResource>,
        desc: SrvDesc,
        dest: CpuDescriptor,
    ) {
        self.record_view(resource.map(RawResource::id), ViewKind::Srv(desc), dest);
    }

    pub fn create_unordered_access_view(&self, resource: &RawResource, dest: CpuDescriptor) {
        self.record_view(Some(resource.id), ViewKind::Uav, dest);
    }

    pub fn create_render_target_view(&self, resource: &RawResource, dest: CpuDescriptor) {
        self.record_view(Some(resource.id), ViewKind::Rtv, dest);
    }

    pub fn create_depth_stencil_view(&self, resource: &RawResource, dest: CpuDescriptor) {
        self.record_view(Some(resource.id), ViewKind::Dsv, dest);
    }

    pub fn create_constant_buffer_view(&self, gpu_address: u64, size: u32, dest: CpuDescriptor) {
        self.record_view(None, ViewKind::Cbv { gpu_address, size }, dest);
    }

    fn record_view(&self, resource: Option<u64>, kind: ViewKind, dest: CpuDescriptor) {
        self.shared
            .views
            .borrow_mut()
            .push(ViewRecord { resource, kind, dest });
    }

    /// Copy `count` descriptors from a CPU-only heap to a shader-visible
    /// one.  Recorded by duplicating the view records at the destination.
    pub fn copy_descriptors(&self, dest: GpuDescriptorWrite, src: CpuDescriptor, count: u32) {
        let mut views = self.shared.views.borrow_mut();
        let mut copies = Vec::new();
        for i in 0..count as u64 {
            let src_handle = CpuDescriptor(src.0 + i * 32);
            if let Some(record) = views.iter().rev().find(|v| v.dest == src_handle) {
                copies.push(ViewRecord {
                    dest: CpuDescriptor(dest.cpu.0 + i * 32),
                    ..record.clone()
                });
            }
        }
        views.extend(copies);
    }

    /// All descriptor writes so far, in creation order.
    pub fn view_records(&self) -> Vec<ViewRecord> {
        self.shared.views.borrow().clone()
    }

    pub fn create_command_queue(&self) -> Queue {
        Queue {
            executed: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn create_command_allocator(&self) -> CommandAllocator {
        CommandAllocator {
            id: self.shared.next_id(),
        }
    }

    pub fn create_command_list(&self, _allocator: &CommandAllocator) -> CommandList {
        CommandList {
            commands: Vec::new(),
            open: true,
        }
    }

    pub fn create_fence(&self, initial_value: u64) -> Fence {
        Fence {
            completed: Cell::new(initial_value),
            last_signaled: Cell::new(initial_value),
        }
    }

    pub fn create_root_signature_from_bytecode(
        &self,
        _bytecode: &[u8],
    ) -> Result<RawRootSignature, Error> {
        Ok(RawRootSignature {
            id: self.shared.next_id(),
        })
    }

    pub fn create_graphics_pipeline(
        &self,
        _vs: &[u8],
        _ps: &[u8],
        _root_signature: &RawRootSignature,
    ) -> Result<RawPipelineState, Error> {
        Ok(RawPipelineState {
            id: self.shared.next_id(),
        })
    }

    pub fn create_compute_pipeline(
        &self,
        _cs: &[u8],
        _root_signature: &RawRootSignature,
    ) -> Result<RawPipelineState, Error> {
        Ok(RawPipelineState {
            id: self.shared.next_id(),
        })
    }

    /// Build a raytracing state object from a shader library blob.  Exports
    /// are resolved by name at identifier-query time.
    pub fn create_state_object(
        &self,
        _library: &[u8],
        _root_signature: &RawRootSignature,
    ) -> Result<RawStateObject, Error> {
        Ok(RawStateObject {
            id: self.shared.next_id(),
        })
    }

    pub fn accel_prebuild_info(&self, inputs: &AccelInputs) -> PrebuildInfo {
        fn align_256(x: u64) -> u64 {
            (x + 255) & !255
        }
        match inputs {
            AccelInputs::BottomLevel(geometries) => {
                let triangles: u64 = geometries
                    .iter()
                    .map(|g| (g.index_count / 3) as u64)
                    .sum();
                PrebuildInfo {
                    result_size: align_256(256 + 64 * triangles),
                    scratch_size: align_256(128 + 32 * triangles),
                }
            }
            AccelInputs::TopLevel { instance_count, .. } => PrebuildInfo {
                result_size: align_256(256 + 64 * *instance_count as u64),
                scratch_size: align_256(128 + 32 * *instance_count as u64),
            },
        }
    }

    pub fn create_swapchain(
        &self,
        _window: Option<RawWindowHandle>,
        width: u32,
        height: u32,
        buffer_count: u32,
        format: PixelFormat,
    ) -> Result<Swapchain, Error> {
        let mut buffers = Vec::with_capacity(buffer_count as usize);
        for _ in 0..buffer_count {
            let desc = ResourceDesc {
                allow_render_target: true,
                ..ResourceDesc::texture_2d(format, width as u64, height, 1)
            };
            buffers.push(Some(self.create_resource(
                HeapType::Default,
                &desc,
                ResourceState::Present,
            )?));
        }
        Ok(Swapchain {
            buffers: RefCell::new(buffers),
            current: Cell::new(0),
            count: buffer_count,
        })
    }
}

/// Destination of a descriptor copy: the shader-visible handle pair.
#[derive(Debug, Clone, Copy)]
pub struct GpuDescriptorWrite {
    pub cpu: CpuDescriptor,
    pub gpu: GpuDescriptor,
}

pub struct RawResource {
    shared: Rc<DeviceShared>,
    id: u64,
    desc: ResourceDesc,
    initial_state: ResourceState,
    gpu_address: u64,
    memory: Option<RefCell<Vec<u8>>>,
}

impl RawResource {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn desc(&self) -> ResourceDesc {
        self.desc
    }

    pub fn initial_state(&self) -> ResourceState {
        self.initial_state
    }

    pub fn gpu_address(&self) -> u64 {
        self.gpu_address
    }

    /// Write through the persistent mapping.  Panics on default-heap
    /// resources and out-of-bounds ranges; both are caller bugs.
    pub fn write(&self, offset: usize, bytes: &[u8]) {
        let memory = self
            .memory
            .as_ref()
            .expect("resource is not CPU-mappable");
        memory.borrow_mut()[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub fn read(&self, offset: usize, len: usize) -> Vec<u8> {
        let memory = self
            .memory
            .as_ref()
            .expect("resource is not CPU-mappable");
        memory.borrow()[offset..offset + len].to_vec()
    }
}

impl Drop for RawResource {
    fn drop(&mut self) {
        self.shared
            .live_resources
            .set(self.shared.live_resources.get() - 1);
    }
}

pub struct CommandAllocator {
    #[allow(dead_code)]
    id: u64,
}

impl CommandAllocator {
    pub fn reset(&mut self) {}
}

pub struct CommandList {
    commands: Vec<Command>,
    open: bool,
}

impl CommandList {
    pub fn record(&mut self, command: Command) {
        assert!(self.open, "command list is closed");
        self.commands.push(command);
    }

    pub fn close(&mut self) {
        self.open = false;
    }

    pub fn reset(&mut self, _allocator: &CommandAllocator) {
        self.commands.clear();
        self.open = true;
    }
}

pub struct Queue {
    executed: Rc<RefCell<Vec<Command>>>,
}

impl Queue {
    /// Submit a closed command list.  Commands move to the executed stream.
    pub fn execute(&self, list: &mut CommandList) {
        assert!(!list.open, "command list must be closed before execution");
        self.executed.borrow_mut().append(&mut list.commands);
    }

    pub fn signal(&self, fence: &Fence, value: u64) {
        assert!(
            value > fence.last_signaled.get(),
            "fence values must be monotonically increasing"
        );
        fence.last_signaled.set(value);
    }

    /// The full executed command stream since creation (or the last clear).
    pub fn executed(&self) -> Vec<Command> {
        self.executed.borrow().clone()
    }

    pub fn clear_executed(&self) {
        self.executed.borrow_mut().clear();
    }
}

pub struct Fence {
    completed: Cell<u64>,
    last_signaled: Cell<u64>,
}

impl Fence {
    pub fn completed_value(&self) -> u64 {
        self.completed.get()
    }

    /// Block until the fence reaches `value`.  In this backend the wait is
    /// the completion: pending signals up to `value` complete here and
    /// nowhere else.  Waiting for a value nothing signaled would hang a
    /// real device, so it panics.
    pub fn wait_for(&self, value: u64) {
        assert!(
            value <= self.last_signaled.get(),
            "wait for fence value {value} which was never signaled"
        );
        if value > self.completed.get() {
            self.completed.set(value);
        }
    }
}

pub struct Swapchain {
    buffers: RefCell<Vec<Option<RawResource>>>,
    current: Cell<u32>,
    count: u32,
}

impl Swapchain {
    pub fn buffer_count(&self) -> u32 {
        self.count
    }

    /// Take ownership of back buffer `index`.  Each buffer can be taken
    /// once; the caller is its owner from then on.
    pub fn take_buffer(&self, index: u32) -> RawResource {
        self.buffers.borrow_mut()[index as usize]
            .take()
            .expect("swapchain buffer already taken")
    }

    pub fn current_back_buffer_index(&self) -> u32 {
        self.current.get()
    }

    pub fn present(&self) {
        self.current.set((self.current.get() + 1) % self.count);
    }
}

pub struct RawRootSignature {
    id: u64,
}

impl RawRootSignature {
    pub fn id(&self) -> u64 {
        self.id
    }
}

pub struct RawPipelineState {
    id: u64,
}

impl RawPipelineState {
    pub fn id(&self) -> u64 {
        self.id
    }
}

pub struct RawStateObject {
    id: u64,
}

impl RawStateObject {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 32-byte shader identifier for an export.  Deterministic per
    /// (object, export) pair so table records are comparable in tests.
    pub fn shader_identifier(&self, export: &str) -> [u8; 32] {
        use std::hash::{Hash, Hasher};
        let mut out = [0u8; 32];
        for (chunk, salt) in out.chunks_mut(8).zip(0u64..) {
            let mut hasher = std::hash::DefaultHasher::new();
            self.id.hash(&mut hasher);
            export.hash(&mut hasher);
            salt.hash(&mut hasher);
            chunk.copy_from_slice(&hasher.finish().to_le_bytes());
        }
        out
    }
}
