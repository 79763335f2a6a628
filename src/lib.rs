/*! rays_and_frames is the GPU resource and frame lifecycle layer for a
hardware raytracing demo renderer.

Most raytracing samples bury the interesting part — who owns which GPU
object, in what state, and for how long — under the API ceremony.  This
crate inverts that: the lifecycle manager is the product, and the demo
(acceleration structures, shader tables, scene upload, UI composite) is a
thin client of it.

# What the lifecycle layer provides

| Component | Job | Failure mode |
|-----------|-----|--------------|
| [`gfx::ResourceRegistry`] | fixed 256-slot table of native resources, each tagged with its current state and format; idempotent transition barriers | hard assert on table overflow |
| [`gfx::DescriptorHeap`] | linear bump allocation over four heap regions; the two GPU-visible regions reset once per frame | hard assert on heap overflow |
| [`gfx::UploadArena`] | per-frame 8 MiB linear arena over persistently mapped upload memory, 256-byte aligned | hard assert on arena overflow |
| [`gfx::PipelineCache`] | content-hash-keyed cache of compiled pipeline + root signature pairs over a fixed 64-slot pool | hard assert on pool overflow |
| [`gfx::FrameScheduler`] | double-buffered fence cycle capping in-flight frames at 2 | none; waits block indefinitely |

All of these are fields of an explicitly constructed [`gfx::GfxContext`].
There are no singletons and no lazy initialization; construction order is
spelled out in `GfxContext::new`.

# Concurrency model

One CPU thread records everything.  The GPU is the only source of
parallelism, and the only synchronization points are the end-of-frame
throttle and full drains.  The two-frame-deep double buffering of
descriptor and upload heaps is what keeps a write in frame N from racing a
still-in-flight read from frame N−1; nothing else is needed and nothing
else is provided.

# Backends

The backend is selected by cargo feature at compile time, through the
[`imp`] module.  The default `backend_headless` backend is a software
device: it allocates opaque ids, records commands into an inspectable
list, and models fence completion pessimistically (completion advances
only at wait points).  Every invariant in this crate is testable against
it without a GPU.

*/

pub mod accel;
mod error;
pub mod gfx;
pub mod imp;
pub mod mipmap;
pub mod pixel_formats;
pub mod renderer;
pub mod rt;
pub mod scene;
pub mod shaders;
pub mod ui;

pub use error::Error;
