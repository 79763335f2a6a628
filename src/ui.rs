// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Overlay rendering.
//!
//! The widget library lives outside this crate; what arrives here is its
//! output, a [`UiDrawData`] of pre-transformed vertices, 16-bit indices
//! and clipped draw commands.  This module owns the GPU side: the font
//! atlas, an alpha-blended pipeline, and per-frame vertex and index
//! buffers in upload memory that grow on demand and are never shrunk.
//!
//! Buffers are double-buffered by frame slot like everything else, so a
//! grow never frees memory the in-flight frame still reads.

use crate::gfx::{GfxContext, GraphicsPipelineState, PipelineHandle, ResourceHandle};
use crate::imp;
use crate::pixel_formats::PixelFormat;
use crate::scene::{self, TextureData};
use crate::Error;

/// Vertex layout produced by the widget library.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct UiVertex {
    pub position: [f32; 2],
    pub texcoord: [f32; 2],
    /// Packed RGBA, 8 bits per channel.
    pub color: u32,
}

pub const UI_VERTEX_STRIDE: u32 = std::mem::size_of::<UiVertex>() as u32;

/// One ranged draw with its scissor rectangle, in framebuffer pixels.
#[derive(Debug, Clone, Copy)]
pub struct UiDrawCommand {
    pub index_offset: u32,
    pub index_count: u32,
    pub vertex_offset: i32,
    pub clip_rect: [f32; 4],
}

#[derive(Debug, Clone, Default)]
pub struct UiDrawData {
    pub vertices: Vec<UiVertex>,
    pub indices: Vec<u16>,
    pub commands: Vec<UiDrawCommand>,
}

struct FrameBuffers {
    vertices: Option<imp::RawResource>,
    indices: Option<imp::RawResource>,
}

impl FrameBuffers {
    fn capacity(buffer: &Option<imp::RawResource>) -> u64 {
        buffer.as_ref().map_or(0, |b| b.desc().width)
    }
}

pub struct UiRenderer {
    pipeline: PipelineHandle,
    font_texture: ResourceHandle,
    font_srv: imp::CpuDescriptor,
    frames: [FrameBuffers; 2],
}

impl UiRenderer {
    /// `font_atlas` is the widget library's rasterized font, uploaded
    /// once.  Vertex and pixel shaders are the overlay blit pair.
    pub fn new(
        gfx: &mut GfxContext,
        vs: &[u8],
        ps: &[u8],
        font_atlas: &TextureData,
    ) -> Result<UiRenderer, Error> {
        let pipeline = gfx.create_graphics_pipeline(
            vs,
            ps,
            &GraphicsPipelineState {
                depth_test: false,
                alpha_blend: true,
                rtv_format: PixelFormat::Rgba8Unorm,
                dsv_format: PixelFormat::Unknown,
            },
        )?;
        let font_texture = scene::upload_texture(gfx, font_atlas)?;
        let font_srv = gfx.allocate_cpu_descriptors(1);
        let mip_levels = gfx.resource(font_texture).desc().mip_levels as u32;
        gfx.device().create_shader_resource_view(
            Some(gfx.resource(font_texture)),
            imp::SrvDesc::Texture2d {
                format: PixelFormat::Rgba8Unorm,
                mip_levels,
            },
            font_srv,
        );
        Ok(UiRenderer {
            pipeline,
            font_texture,
            font_srv,
            frames: [
                FrameBuffers {
                    vertices: None,
                    indices: None,
                },
                FrameBuffers {
                    vertices: None,
                    indices: None,
                },
            ],
        })
    }

    fn ensure_capacity(
        gfx: &GfxContext,
        buffer: &mut Option<imp::RawResource>,
        needed: u64,
    ) -> Result<(), imp::Error> {
        if FrameBuffers::capacity(buffer) >= needed {
            return Ok(());
        }
        let capacity = needed.next_power_of_two().max(4096);
        logwise::info_sync!(
            "growing overlay buffer to {capacity} bytes",
            capacity = capacity
        );
        *buffer = Some(gfx.device().create_resource(
            imp::HeapType::Upload,
            &imp::ResourceDesc::buffer(capacity),
            imp::ResourceState::GenericRead,
        )?);
        Ok(())
    }

    /// Draw the overlay into the current back buffer.  Called once per
    /// frame between `begin_frame` and `end_frame`.
    pub fn render(&mut self, gfx: &mut GfxContext, draw_data: &UiDrawData) -> Result<(), Error> {
        if draw_data.commands.is_empty() {
            return Ok(());
        }
        let frame = &mut self.frames[gfx.frame_index() as usize];
        let vertex_bytes = (draw_data.vertices.len() * UI_VERTEX_STRIDE as usize) as u64;
        let index_bytes = (draw_data.indices.len() * 2) as u64;
        Self::ensure_capacity(gfx, &mut frame.vertices, vertex_bytes)?;
        Self::ensure_capacity(gfx, &mut frame.indices, index_bytes)?;
        let vertices = frame.vertices.as_ref().unwrap();
        let indices = frame.indices.as_ref().unwrap();
        vertices.write(0, bytemuck::cast_slice(&draw_data.vertices));
        indices.write(0, bytemuck::cast_slice(&draw_data.indices));
        let vertex_buffer = (vertices.gpu_address(), vertices.desc().width as u32);
        let index_buffer = (indices.gpu_address(), indices.desc().width as u32);

        let (width, height) = gfx.resolution();
        let projection =
            glam::Mat4::orthographic_rh(0.0, width as f32, height as f32, 0.0, 0.0, 1.0);
        let constants = gfx.upload(std::mem::size_of::<glam::Mat4>() as u64);
        constants.write_pod(&projection);
        let constants_address = constants.gpu_address;

        let back_buffer = gfx.back_buffer();
        gfx.transition_barrier(back_buffer, imp::ResourceState::RenderTarget);
        gfx.set_pipeline(self.pipeline);
        let font_table = gfx.copy_descriptors_to_gpu_heap(self.font_srv, 1);
        let rtv = gfx.back_buffer_rtv();
        gfx.cmd()
            .record(imp::Command::SetRenderTargets { rtv, dsv: None });
        gfx.cmd().record(imp::Command::SetGraphicsRootCbv {
            index: 0,
            gpu_address: constants_address,
        });
        gfx.cmd().record(imp::Command::SetGraphicsRootTable {
            index: 1,
            base: font_table,
        });
        gfx.cmd().record(imp::Command::SetVertexBuffer {
            gpu_address: vertex_buffer.0,
            size: vertex_buffer.1,
            stride: UI_VERTEX_STRIDE,
        });
        gfx.cmd().record(imp::Command::SetIndexBuffer {
            gpu_address: index_buffer.0,
            size: index_buffer.1,
            format: PixelFormat::R16Uint,
        });
        for command in &draw_data.commands {
            gfx.cmd().record(imp::Command::SetScissor {
                left: command.clip_rect[0] as i32,
                top: command.clip_rect[1] as i32,
                right: command.clip_rect[2] as i32,
                bottom: command.clip_rect[3] as i32,
            });
            gfx.cmd().record(imp::Command::DrawIndexed {
                index_count: command.index_count,
                first_index: command.index_offset,
                base_vertex: command.vertex_offset,
            });
        }
        Ok(())
    }

    pub fn release(self, gfx: &mut GfxContext) {
        gfx.release_resource(self.font_texture);
        gfx.release_pipeline(self.pipeline);
    }
}
