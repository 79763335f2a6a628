// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Scene data and its GPU residency.
//!
//! Parsing model files is someone else's job.  This module defines the
//! handoff structure a loader fills in ([`SceneSource`]), validates its
//! cross-references, and moves it into GPU memory: one shared vertex
//! buffer, one shared index buffer, one texture per image, and persistent
//! SRVs for all of them.
//!
//! The SRV layout is a contract with the shaders: the vertex buffer view
//! comes first (structured, one element per vertex), the index buffer
//! view second (`Rgb32Uint`, one element per triangle), the object
//! transform table third (structured, one 3x4 matrix per object), then a
//! 1x1 white fallback view and one `Texture2d` view per texture in
//! source order.

use crate::accel::transform_rows;
use crate::gfx::GfxContext;
use crate::gfx::ResourceHandle;
use crate::imp;
use crate::pixel_formats::PixelFormat;
use crate::Error;

/// Interleaved vertex layout shared by every mesh.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub texcoord: [f32; 2],
    pub tangent: [f32; 4],
}

pub const VERTEX_STRIDE: u32 = std::mem::size_of::<Vertex>() as u32;

/// A contiguous index range drawn with one material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshSection {
    pub index_offset: u32,
    pub index_count: u32,
    pub vertex_offset: u32,
    pub material_index: u32,
}

/// Most meshes have exactly one section; the single case carries no
/// heap allocation.
#[derive(Debug, Clone)]
pub enum MeshSections {
    Single(MeshSection),
    Many(Vec<MeshSection>),
}

impl MeshSections {
    pub fn len(&self) -> usize {
        match self {
            MeshSections::Single(_) => 1,
            MeshSections::Many(sections) => sections.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &MeshSection> {
        match self {
            MeshSections::Single(section) => std::slice::from_ref(section).iter(),
            MeshSections::Many(sections) => sections.iter(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Mesh {
    pub sections: MeshSections,
}

/// Texture fields index into [`SceneSource::textures`]; `None` means the
/// shader falls back to the factor alone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    pub base_color_factor: glam::Vec4,
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub base_color_texture: Option<u16>,
    pub metallic_roughness_texture: Option<u16>,
    pub normal_texture: Option<u16>,
}

impl Default for Material {
    fn default() -> Self {
        Material {
            base_color_factor: glam::Vec4::ONE,
            metallic_factor: 0.0,
            roughness_factor: 1.0,
            base_color_texture: None,
            metallic_roughness_texture: None,
            normal_texture: None,
        }
    }
}

/// One placed instance of a mesh.
#[derive(Debug, Clone, Copy)]
pub struct Object {
    pub mesh_index: u32,
    pub transform: glam::Affine3A,
}

/// Decoded image ready for upload, always RGBA8.
#[derive(Debug, Clone)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// Everything a scene loader produces, in CPU memory.
#[derive(Debug, Clone, Default)]
pub struct SceneSource {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub meshes: Vec<Mesh>,
    pub materials: Vec<Material>,
    pub objects: Vec<Object>,
    pub textures: Vec<TextureData>,
}

impl SceneSource {
    /// Check every cross-reference before anything touches the GPU.
    pub fn validate(&self) -> Result<(), Error> {
        if self.vertices.is_empty() || self.indices.is_empty() {
            return Err(Error::InvalidScene("scene has no geometry"));
        }
        if self.indices.len() % 3 != 0 {
            return Err(Error::InvalidScene("index count is not a triangle multiple"));
        }
        for mesh in &self.meshes {
            if mesh.sections.is_empty() {
                return Err(Error::InvalidScene("mesh has no sections"));
            }
            for section in mesh.sections.iter() {
                if section.material_index as usize >= self.materials.len() {
                    return Err(Error::InvalidScene("section references a missing material"));
                }
                if section.index_count % 3 != 0 {
                    return Err(Error::InvalidScene(
                        "section index count is not a triangle multiple",
                    ));
                }
                let end = section.index_offset as usize + section.index_count as usize;
                if end > self.indices.len() {
                    return Err(Error::InvalidScene("section overruns the index buffer"));
                }
                if section.vertex_offset as usize >= self.vertices.len() {
                    return Err(Error::InvalidScene("section overruns the vertex buffer"));
                }
            }
        }
        for material in &self.materials {
            for texture in [
                material.base_color_texture,
                material.metallic_roughness_texture,
                material.normal_texture,
            ]
            .into_iter()
            .flatten()
            {
                if texture as usize >= self.textures.len() {
                    return Err(Error::InvalidScene("material references a missing texture"));
                }
            }
        }
        for texture in &self.textures {
            if texture.width == 0 || texture.height == 0 {
                return Err(Error::InvalidScene("texture has a zero dimension"));
            }
            let expected = texture.width as usize * texture.height as usize * 4;
            if texture.rgba.len() != expected {
                return Err(Error::InvalidScene(
                    "texture pixel data does not match its dimensions",
                ));
            }
        }
        if self.objects.is_empty() {
            return Err(Error::InvalidScene("scene places no objects"));
        }
        for object in &self.objects {
            if object.mesh_index as usize >= self.meshes.len() {
                return Err(Error::InvalidScene("object references a missing mesh"));
            }
        }
        Ok(())
    }
}

/// Decode a PNG into RGBA8.  RGB input gains an opaque alpha channel;
/// anything else is rejected.
pub fn decode_png(data: &[u8]) -> Result<TextureData, Error> {
    let decoder = png::Decoder::new(std::io::Cursor::new(data));
    let mut reader = decoder.read_info()?;
    if reader.info().bit_depth != png::BitDepth::Eight {
        return Err(Error::UnsupportedTexture("only 8-bit PNGs are supported"));
    }
    let size = reader
        .output_buffer_size()
        .ok_or(Error::UnsupportedTexture("image is too large to decode"))?;
    let mut buf = vec![0u8; size];
    let info = reader.next_frame(&mut buf)?;
    buf.truncate(info.buffer_size());
    let rgba = match info.color_type {
        png::ColorType::Rgba => buf,
        png::ColorType::Rgb => {
            let mut rgba = Vec::with_capacity(buf.len() / 3 * 4);
            for px in buf.chunks_exact(3) {
                rgba.extend_from_slice(px);
                rgba.push(0xff);
            }
            rgba
        }
        _ => return Err(Error::UnsupportedTexture("grayscale and palette PNGs")),
    };
    Ok(TextureData {
        width: info.width,
        height: info.height,
        rgba,
    })
}

fn is_pow2_square(width: u32, height: u32) -> bool {
    width == height && width.is_power_of_two()
}

/// A scene resident on the GPU.
pub struct Scene {
    pub vertex_buffer: ResourceHandle,
    pub index_buffer: ResourceHandle,
    /// One 3x4 object-to-world matrix per object, in object order.
    pub transforms_buffer: ResourceHandle,
    /// 1x1 white texture standing in for material slots with no image.
    pub fallback_texture: ResourceHandle,
    pub textures: Vec<ResourceHandle>,
    /// Base of the persistent SRV block: vertex view, index view,
    /// transform table view, fallback texture view, then texture views.
    pub srv_base: imp::CpuDescriptor,
    pub meshes: Vec<Mesh>,
    pub materials: Vec<Material>,
    pub objects: Vec<Object>,
    pub vertex_count: u32,
    pub index_count: u32,
}

impl Scene {
    /// Move `source` into GPU memory.  Copies are recorded on the
    /// context's open command list; the caller flushes them before the
    /// first frame that samples the scene.
    pub fn upload(gfx: &mut GfxContext, source: SceneSource) -> Result<Scene, Error> {
        source.validate()?;
        let vertex_count = source.vertices.len() as u32;
        let index_count = source.indices.len() as u32;
        let summary = format!(
            "{} vertices, {} triangles, {} textures",
            vertex_count,
            index_count / 3,
            source.textures.len()
        );
        logwise::info_sync!("uploading scene: {summary}", summary = summary);

        let vertex_buffer = upload_buffer(
            gfx,
            bytemuck::cast_slice(&source.vertices),
            PixelFormat::Unknown,
        )?;
        let index_buffer = upload_buffer(
            gfx,
            bytemuck::cast_slice(&source.indices),
            PixelFormat::Rgb32Uint,
        )?;
        let transform_table: Vec<[[f32; 4]; 3]> = source
            .objects
            .iter()
            .map(|object| transform_rows(&object.transform))
            .collect();
        let transforms_buffer = upload_buffer(
            gfx,
            bytemuck::cast_slice(&transform_table),
            PixelFormat::Unknown,
        )?;

        let srv_base = gfx.allocate_cpu_descriptors(4 + source.textures.len() as u32);
        let srv_size = gfx.cbv_srv_uav_descriptor_size() as u64;
        gfx.device().create_shader_resource_view(
            Some(gfx.resource(vertex_buffer)),
            imp::SrvDesc::Buffer {
                format: PixelFormat::Unknown,
                first_element: 0,
                element_count: vertex_count,
                stride: VERTEX_STRIDE,
            },
            srv_base,
        );
        // One Rgb32Uint element per triangle; hit shaders fetch a whole
        // triangle's indices in one load.
        gfx.device().create_shader_resource_view(
            Some(gfx.resource(index_buffer)),
            imp::SrvDesc::Buffer {
                format: PixelFormat::Rgb32Uint,
                first_element: 0,
                element_count: index_count / 3,
                stride: 0,
            },
            imp::CpuDescriptor(srv_base.0 + srv_size),
        );
        gfx.device().create_shader_resource_view(
            Some(gfx.resource(transforms_buffer)),
            imp::SrvDesc::Buffer {
                format: PixelFormat::Unknown,
                first_element: 0,
                element_count: source.objects.len() as u32,
                stride: std::mem::size_of::<[[f32; 4]; 3]>() as u32,
            },
            imp::CpuDescriptor(srv_base.0 + 2 * srv_size),
        );

        let fallback_texture = upload_texture(
            gfx,
            &TextureData {
                width: 1,
                height: 1,
                rgba: vec![0xff; 4],
            },
        )?;
        gfx.device().create_shader_resource_view(
            Some(gfx.resource(fallback_texture)),
            imp::SrvDesc::Texture2d {
                format: PixelFormat::Rgba8Unorm,
                mip_levels: 1,
            },
            imp::CpuDescriptor(srv_base.0 + 3 * srv_size),
        );

        let mut textures = Vec::with_capacity(source.textures.len());
        for (i, data) in source.textures.iter().enumerate() {
            let handle = upload_texture(gfx, data)?;
            let mip_levels = gfx.resource(handle).desc().mip_levels as u32;
            gfx.device().create_shader_resource_view(
                Some(gfx.resource(handle)),
                imp::SrvDesc::Texture2d {
                    format: PixelFormat::Rgba8Unorm,
                    mip_levels,
                },
                imp::CpuDescriptor(srv_base.0 + (4 + i as u64) * srv_size),
            );
            textures.push(handle);
        }

        Ok(Scene {
            vertex_buffer,
            index_buffer,
            transforms_buffer,
            fallback_texture,
            textures,
            srv_base,
            meshes: source.meshes,
            materials: source.materials,
            objects: source.objects,
            vertex_count,
            index_count,
        })
    }

    /// SRV of a material texture slot, or the white fallback view when
    /// the slot carries no image.
    pub fn texture_srv(&self, gfx: &GfxContext, texture: Option<u16>) -> imp::CpuDescriptor {
        let srv_size = gfx.cbv_srv_uav_descriptor_size() as u64;
        match texture {
            Some(index) => imp::CpuDescriptor(self.srv_base.0 + (4 + index as u64) * srv_size),
            None => imp::CpuDescriptor(self.srv_base.0 + 3 * srv_size),
        }
    }

    /// Drop every GPU resource the scene owns.  The handles in `self` are
    /// stale afterwards.
    pub fn release(self, gfx: &mut GfxContext) {
        gfx.release_resource(self.vertex_buffer);
        gfx.release_resource(self.index_buffer);
        gfx.release_resource(self.transforms_buffer);
        gfx.release_resource(self.fallback_texture);
        for texture in self.textures {
            gfx.release_resource(texture);
        }
    }
}

/// Create a default-heap buffer, stage `bytes` through the upload arena,
/// record the copy and leave the buffer shader-readable.
fn upload_buffer(
    gfx: &mut GfxContext,
    bytes: &[u8],
    format: PixelFormat,
) -> Result<ResourceHandle, Error> {
    let size = bytes.len() as u64;
    let mut desc = imp::ResourceDesc::buffer(size);
    desc.format = format;
    let handle = gfx.create_resource(imp::HeapType::Default, &desc, imp::ResourceState::CopyDest)?;
    let dst = gfx.resource(handle).id();

    let staging = gfx.upload(size);
    staging.write(bytes);
    let (src, src_offset) = (staging.buffer_id(), staging.offset);
    gfx.cmd().record(imp::Command::CopyBufferRegion {
        dst,
        dst_offset: 0,
        src,
        src_offset,
        size,
    });
    gfx.transition_barrier(handle, imp::ResourceState::NonPixelShaderResource);
    Ok(handle)
}

/// Upload mip 0 of a texture.  Square power-of-two images get a full mip
/// chain (filled in later by the mipmap generator); everything else gets
/// a single level.
pub(crate) fn upload_texture(
    gfx: &mut GfxContext,
    data: &TextureData,
) -> Result<ResourceHandle, Error> {
    let mip_levels = if is_pow2_square(data.width, data.height) {
        data.width.ilog2() as u16 + 1
    } else {
        1
    };
    let desc = imp::ResourceDesc {
        allow_unordered_access: mip_levels > 1,
        ..imp::ResourceDesc::texture_2d(
            PixelFormat::Rgba8Unorm,
            data.width as u64,
            data.height,
            mip_levels,
        )
    };
    let handle = gfx.create_resource(imp::HeapType::Default, &desc, imp::ResourceState::CopyDest)?;
    let dst = gfx.resource(handle).id();

    // Copy rows out at the 256-byte row pitch the copy engine requires.
    let row_bytes = data.width as usize * 4;
    let row_pitch = (row_bytes + 255) & !255;
    let staging = gfx.upload((row_pitch * data.height as usize) as u64);
    for y in 0..data.height as usize {
        staging.write_at(
            (y * row_pitch) as u64,
            &data.rgba[y * row_bytes..(y + 1) * row_bytes],
        );
    }
    let (src, src_offset) = (staging.buffer_id(), staging.offset);
    gfx.cmd().record(imp::Command::CopyBufferToTexture {
        dst,
        dst_mip: 0,
        src,
        src_offset,
        row_pitch: row_pitch as u32,
    });
    gfx.transition_barrier(handle, imp::ResourceState::NonPixelShaderResource);
    Ok(handle)
}
