// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! The demo renderer.
//!
//! Ties the lifecycle layer and the demo pieces into the shape of a real
//! frame: one-time initialization (scene upload, acceleration builds,
//! mip generation, font atlas) flushed before the loop, then per frame a
//! rebuilt shader table, a ray dispatch into an offscreen UAV target, a
//! copy into the back buffer and the overlay composite on top.
//!
//! Root signature contract with the ray shaders: constant buffer at
//! parameter 0, output UAV and TLAS SRV table at 1, scene table (vertex,
//! index and object-transform views) at 2.  Material textures ride in
//! the shader table, one descriptor table per hit record.

use crate::accel::SceneAccel;
use crate::gfx::{GfxContext, ResourceHandle};
use crate::imp;
use crate::mipmap::MipmapGenerator;
use crate::pixel_formats::PixelFormat;
use crate::rt::{PerFrameConstants, RayPipeline};
use crate::scene::{Scene, SceneSource, TextureData};
use crate::shaders::ShaderLibrary;
use crate::ui::{UiDrawData, UiRenderer};
use crate::Error;

/// The compiled blobs the renderer needs, loaded up front so a missing
/// file fails before any GPU work starts.
pub struct RendererShaders {
    pub raytracing_library: Vec<u8>,
    pub overlay_vs: Vec<u8>,
    pub overlay_ps: Vec<u8>,
    pub downsample_cs: Vec<u8>,
}

impl RendererShaders {
    pub fn load(library: &ShaderLibrary) -> Result<RendererShaders, Error> {
        Ok(RendererShaders {
            raytracing_library: library.load("raytracer.lib.cso")?,
            overlay_vs: library.load("overlay.vs.cso")?,
            overlay_ps: library.load("overlay.ps.cso")?,
            downsample_cs: library.load("downsample_mips.cs.cso")?,
        })
    }
}

pub struct RayTracer {
    pipeline: RayPipeline,
    scene: Scene,
    accel: SceneAccel,
    mipgen: MipmapGenerator,
    ui: UiRenderer,
    output: ResourceHandle,
    /// Persistent CPU descriptor pair: output UAV, then TLAS SRV.
    output_descriptors: imp::CpuDescriptor,
    camera_to_world: glam::Mat4,
    projection: glam::Mat4,
    frame_count: u32,
}

impl RayTracer {
    /// Record and flush all one-time initialization.  The context must be
    /// freshly constructed (its command list open and empty of frames).
    pub fn new(
        gfx: &mut GfxContext,
        shaders: &RendererShaders,
        source: SceneSource,
        font_atlas: &TextureData,
    ) -> Result<RayTracer, Error> {
        let pipeline = RayPipeline::new(gfx, &shaders.raytracing_library)?;
        let scene = Scene::upload(gfx, source)?;
        let mut accel = SceneAccel::build(gfx, &scene)?;
        let mipgen = MipmapGenerator::new(gfx, PixelFormat::Rgba8Unorm, &shaders.downsample_cs)?;
        for i in 0..scene.textures.len() {
            let texture = scene.textures[i];
            if gfx.resource(texture).desc().mip_levels > 1 {
                mipgen.generate(gfx, texture);
            }
        }
        let ui = UiRenderer::new(gfx, &shaders.overlay_vs, &shaders.overlay_ps, font_atlas)?;

        let (width, height) = gfx.resolution();
        let output_desc = imp::ResourceDesc {
            allow_unordered_access: true,
            ..imp::ResourceDesc::texture_2d(PixelFormat::Rgba8Unorm, width as u64, height, 1)
        };
        let output = gfx.create_resource(
            imp::HeapType::Default,
            &output_desc,
            imp::ResourceState::UnorderedAccess,
        )?;
        let output_descriptors = gfx.allocate_cpu_descriptors(2);
        let descriptor_size = gfx.cbv_srv_uav_descriptor_size() as u64;
        gfx.device()
            .create_unordered_access_view(gfx.resource(output), output_descriptors);
        gfx.device().create_shader_resource_view(
            None,
            imp::SrvDesc::AccelerationStructure {
                gpu_address: accel.tlas.gpu_address,
            },
            imp::CpuDescriptor(output_descriptors.0 + descriptor_size),
        );

        gfx.flush_and_wait();
        accel.release_temps();
        let resolution = format!("{width}x{height}");
        logwise::info_sync!("renderer initialized at {resolution}", resolution = resolution);

        Ok(RayTracer {
            pipeline,
            scene,
            accel,
            mipgen,
            ui,
            output,
            output_descriptors,
            camera_to_world: glam::Mat4::IDENTITY,
            projection: glam::Mat4::perspective_rh(
                std::f32::consts::FRAC_PI_4,
                width as f32 / height as f32,
                0.1,
                100.0,
            ),
            frame_count: 0,
        })
    }

    pub fn set_camera(&mut self, camera_to_world: glam::Mat4, projection: glam::Mat4) {
        self.camera_to_world = camera_to_world;
        self.projection = projection;
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    /// Record and submit one frame.
    pub fn draw_frame(&mut self, gfx: &mut GfxContext, overlay: &UiDrawData) -> Result<(), Error> {
        gfx.begin_frame();
        let (width, height) = gfx.resolution();

        let constants = gfx.upload(std::mem::size_of::<PerFrameConstants>() as u64);
        constants.write_pod(&PerFrameConstants {
            camera_to_world: self.camera_to_world,
            inv_projection: self.projection.inverse(),
            frame_index: self.frame_count,
            padding: [0; 3],
        });
        let constants_address = constants.gpu_address;

        // Stage this frame's descriptor tables: output + TLAS, then the
        // scene block (vertex, index and object-transform views).
        let output_table = gfx.copy_descriptors_to_gpu_heap(self.output_descriptors, 2);
        let scene_table = gfx.copy_descriptors_to_gpu_heap(self.scene.srv_base, 3);

        self.pipeline.bind(gfx);
        gfx.cmd().record(imp::Command::SetComputeRootCbv {
            index: 0,
            gpu_address: constants_address,
        });
        gfx.cmd().record(imp::Command::SetComputeRootTable {
            index: 1,
            base: output_table,
        });
        gfx.cmd().record(imp::Command::SetComputeRootTable {
            index: 2,
            base: scene_table,
        });
        let shader_table = self.pipeline.build_shader_table(gfx, &self.scene);
        self.pipeline.dispatch(gfx, &shader_table, width, height);

        // The dispatch wrote the offscreen target; publish it to the back
        // buffer and composite the overlay on top.
        let output_id = gfx.resource(self.output).id();
        gfx.cmd().record(imp::Command::UavBarrier {
            resource: Some(output_id),
        });
        let back_buffer = gfx.back_buffer();
        gfx.transition_barrier(self.output, imp::ResourceState::CopySource);
        gfx.transition_barrier(back_buffer, imp::ResourceState::CopyDest);
        let back_buffer_id = gfx.resource(back_buffer).id();
        gfx.cmd().record(imp::Command::CopyResource {
            dst: back_buffer_id,
            src: output_id,
        });
        gfx.transition_barrier(self.output, imp::ResourceState::UnorderedAccess);
        gfx.transition_barrier(back_buffer, imp::ResourceState::RenderTarget);

        self.ui.render(gfx, overlay)?;

        gfx.end_frame();
        self.frame_count += 1;
        Ok(())
    }

    /// Drain the GPU and free everything the renderer owns.
    pub fn shutdown(self, gfx: &mut GfxContext) {
        gfx.wait_for_gpu();
        self.ui.release(gfx);
        self.mipgen.release(gfx);
        self.accel.release(gfx);
        self.scene.release(gfx);
        gfx.release_resource(self.output);
    }
}
