// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Raytracing pipeline and shader table.
//!
//! The shader table layout is a wire contract with the dispatch command:
//! the 32-byte ray generation record at offset 0, two 32-byte miss
//! records (radiance, then shadow) at 64, and 64-byte hit group records
//! from 128 up.  Every (object, section) pair contributes two hit
//! records: a radiance record whose root-argument space carries
//! [`PerGeometryRootData`] and a material descriptor table handle, and a
//! shadow record holding only its identifier.
//!
//! The table is rebuilt from the upload arena every frame.  It is a few
//! kilobytes for a real scene, and rebuilding it is cheaper than
//! tracking which frame last touched a persistent copy.

use crate::gfx::GfxContext;
use crate::imp;
use crate::scene::Scene;
use crate::Error;

pub const SHADER_IDENTIFIER_SIZE: usize = 32;
pub const RECORD_STRIDE: u64 = 64;
pub const RAY_GEN_OFFSET: u64 = 0;
pub const MISS_OFFSET: u64 = RECORD_STRIDE;
pub const MISS_STRIDE: u64 = 32;
pub const MISS_SIZE: u64 = 2 * MISS_STRIDE;
pub const HIT_GROUP_OFFSET: u64 = 2 * RECORD_STRIDE;

/// Byte offsets inside a radiance hit record, after the identifier.
const GEOMETRY_DATA_OFFSET: usize = SHADER_IDENTIFIER_SIZE;
const MATERIAL_TABLE_OFFSET: usize = SHADER_IDENTIFIER_SIZE + 16;

pub const RAY_GEN_EXPORT: &str = "CameraRayGeneration";
pub const RADIANCE_MISS_EXPORT: &str = "RadianceMiss";
pub const SHADOW_MISS_EXPORT: &str = "ShadowMiss";
pub const RADIANCE_HIT_GROUP_EXPORT: &str = "RadianceHitGroup";
pub const SHADOW_HIT_GROUP_EXPORT: &str = "ShadowHitGroup";

/// Constants every ray shader reads, uploaded once per frame.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PerFrameConstants {
    pub camera_to_world: glam::Mat4,
    pub inv_projection: glam::Mat4,
    pub frame_index: u32,
    pub padding: [u32; 3],
}

/// Local root arguments of a radiance hit record.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PerGeometryRootData {
    pub object_index: u32,
    pub base_vertex: u32,
    pub base_index: u32,
}

/// Per-frame shader table regions handed to the dispatch.
#[derive(Debug, Clone, Copy)]
pub struct ShaderTable {
    pub ray_gen_address: u64,
    pub miss_address: u64,
    pub hit_group_address: u64,
    pub hit_group_size: u64,
}

pub struct RayPipeline {
    state_object: imp::RawStateObject,
    root_signature: imp::RawRootSignature,
    ray_gen: [u8; SHADER_IDENTIFIER_SIZE],
    radiance_miss: [u8; SHADER_IDENTIFIER_SIZE],
    shadow_miss: [u8; SHADER_IDENTIFIER_SIZE],
    radiance_hit_group: [u8; SHADER_IDENTIFIER_SIZE],
    shadow_hit_group: [u8; SHADER_IDENTIFIER_SIZE],
}

impl RayPipeline {
    /// Build a state object from a compiled shader library and resolve
    /// the identifiers of its five fixed exports.
    pub fn new(gfx: &GfxContext, library: &[u8]) -> Result<RayPipeline, Error> {
        let root_signature = gfx.device().create_root_signature_from_bytecode(library)?;
        let state_object = gfx.device().create_state_object(library, &root_signature)?;
        let ray_gen = state_object.shader_identifier(RAY_GEN_EXPORT);
        let radiance_miss = state_object.shader_identifier(RADIANCE_MISS_EXPORT);
        let shadow_miss = state_object.shader_identifier(SHADOW_MISS_EXPORT);
        let radiance_hit_group = state_object.shader_identifier(RADIANCE_HIT_GROUP_EXPORT);
        let shadow_hit_group = state_object.shader_identifier(SHADOW_HIT_GROUP_EXPORT);
        Ok(RayPipeline {
            state_object,
            root_signature,
            ray_gen,
            radiance_miss,
            shadow_miss,
            radiance_hit_group,
            shadow_hit_group,
        })
    }

    /// Write this frame's shader table into the upload arena and stage
    /// each section's material descriptors into this frame's
    /// shader-visible heap.
    ///
    /// The whole table is built in CPU memory first so the root-argument
    /// space the records do not use stays zero even when the arena chunk
    /// is reused from an earlier frame.
    pub fn build_shader_table(&self, gfx: &mut GfxContext, scene: &Scene) -> ShaderTable {
        let pairs: usize = scene
            .objects
            .iter()
            .map(|object| scene.meshes[object.mesh_index as usize].sections.len())
            .sum();
        let hit_group_size = pairs as u64 * 2 * RECORD_STRIDE;
        let size = HIT_GROUP_OFFSET + hit_group_size;

        let mut records = vec![0u8; size as usize];
        records[..SHADER_IDENTIFIER_SIZE].copy_from_slice(&self.ray_gen);
        let miss = MISS_OFFSET as usize;
        records[miss..miss + SHADER_IDENTIFIER_SIZE].copy_from_slice(&self.radiance_miss);
        let shadow_miss = miss + MISS_STRIDE as usize;
        records[shadow_miss..shadow_miss + SHADER_IDENTIFIER_SIZE]
            .copy_from_slice(&self.shadow_miss);

        let mut offset = HIT_GROUP_OFFSET as usize;
        for (object_index, object) in scene.objects.iter().enumerate() {
            let mesh = &scene.meshes[object.mesh_index as usize];
            for section in mesh.sections.iter() {
                let material = &scene.materials[section.material_index as usize];
                // Material table: base color, metallic-roughness, normal.
                // Slots without an image repeat the base color view, which
                // itself falls back to the 1x1 white texture.
                let base_color = material.base_color_texture;
                let base_color_srv = scene.texture_srv(gfx, base_color);
                let metallic_srv =
                    scene.texture_srv(gfx, material.metallic_roughness_texture.or(base_color));
                let normal_srv =
                    scene.texture_srv(gfx, material.normal_texture.or(base_color));
                let table = gfx.copy_descriptors_to_gpu_heap(base_color_srv, 1);
                gfx.copy_descriptors_to_gpu_heap(metallic_srv, 1);
                gfx.copy_descriptors_to_gpu_heap(normal_srv, 1);

                records[offset..offset + SHADER_IDENTIFIER_SIZE]
                    .copy_from_slice(&self.radiance_hit_group);
                let root = PerGeometryRootData {
                    object_index: object_index as u32,
                    base_vertex: section.vertex_offset,
                    base_index: section.index_offset,
                };
                let data = offset + GEOMETRY_DATA_OFFSET;
                records[data..data + std::mem::size_of::<PerGeometryRootData>()]
                    .copy_from_slice(bytemuck::bytes_of(&root));
                let handle = offset + MATERIAL_TABLE_OFFSET;
                records[handle..handle + 8].copy_from_slice(&table.0.to_le_bytes());
                offset += RECORD_STRIDE as usize;

                records[offset..offset + SHADER_IDENTIFIER_SIZE]
                    .copy_from_slice(&self.shadow_hit_group);
                offset += RECORD_STRIDE as usize;
            }
        }

        let staging = gfx.upload(size);
        staging.write(&records);
        ShaderTable {
            ray_gen_address: staging.gpu_address + RAY_GEN_OFFSET,
            miss_address: staging.gpu_address + MISS_OFFSET,
            hit_group_address: staging.gpu_address + HIT_GROUP_OFFSET,
            hit_group_size,
        }
    }

    /// Bind the global root signature and the state object.  Root
    /// arguments go on the list after this and before `dispatch`.
    pub fn bind(&self, gfx: &mut GfxContext) {
        let state_object = self.state_object.id();
        let root_signature = self.root_signature.id();
        gfx.cmd()
            .record(imp::Command::SetComputeRootSignature { root_signature });
        gfx.cmd()
            .record(imp::Command::SetStateObject { state_object });
    }

    /// Launch `width` x `height` rays through `table`.
    pub fn dispatch(
        &self,
        gfx: &mut GfxContext,
        table: &ShaderTable,
        width: u32,
        height: u32,
    ) {
        gfx.cmd().record(imp::Command::DispatchRays {
            ray_gen_address: table.ray_gen_address,
            miss_address: table.miss_address,
            miss_size: MISS_SIZE,
            miss_stride: MISS_STRIDE,
            hit_group_address: table.hit_group_address,
            hit_group_size: table.hit_group_size,
            hit_group_stride: RECORD_STRIDE,
            width,
            height,
        });
    }

    pub fn root_signature(&self) -> &imp::RawRootSignature {
        &self.root_signature
    }
}
