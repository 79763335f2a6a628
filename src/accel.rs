// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Acceleration structure builds.
//!
//! Builds are one-shot: query sizes, allocate result and scratch, record
//! the build and a UAV barrier.  Result buffers are registry resources
//! that live as long as the scene; scratch and staging buffers are raw
//! device resources the caller keeps in a temp list until the build has
//! been flushed, then drops.
//!
//! The scene hierarchy is flat: one bottom-level structure over every
//! (object, section) pair with the object's world transform baked into a
//! per-geometry transform table, and a top-level structure holding a
//! single identity instance.  Nothing here is refit-aware; rebuilding
//! means releasing and building again.

use crate::gfx::{GfxContext, ResourceHandle};
use crate::imp;
use crate::scene::{Scene, VERTEX_STRIDE};
use crate::Error;

pub struct AccelStructure {
    pub buffer: ResourceHandle,
    pub gpu_address: u64,
}

/// Row-major 3x4 rows of an affine transform, the layout both geometry
/// transforms and instance records use on the GPU.
pub fn transform_rows(transform: &glam::Affine3A) -> [[f32; 4]; 3] {
    let m = glam::Mat4::from(*transform).transpose();
    [m.x_axis.to_array(), m.y_axis.to_array(), m.z_axis.to_array()]
}

/// Stage `bytes` through the upload arena into a fresh default-heap
/// buffer the build command can read.  The buffer lands in `temps`; its
/// GPU address is returned.
fn stage_to_default_heap(
    gfx: &mut GfxContext,
    bytes: &[u8],
    temps: &mut Vec<imp::RawResource>,
) -> Result<u64, imp::Error> {
    let size = bytes.len() as u64;
    let buffer = gfx.device().create_resource(
        imp::HeapType::Default,
        &imp::ResourceDesc::buffer(size),
        imp::ResourceState::CopyDest,
    )?;
    let staging = gfx.upload(size);
    staging.write(bytes);
    let (src, src_offset) = (staging.buffer_id(), staging.offset);
    gfx.cmd().record(imp::Command::CopyBufferRegion {
        dst: buffer.id(),
        dst_offset: 0,
        src,
        src_offset,
        size,
    });
    gfx.cmd().record(imp::Command::Transition {
        resource: buffer.id(),
        from: imp::ResourceState::CopyDest,
        to: imp::ResourceState::NonPixelShaderResource,
    });
    let address = buffer.gpu_address();
    temps.push(buffer);
    Ok(address)
}

/// Upload a table of 3x4 transforms for geometry descs to point into,
/// at `base + i * 48`.
pub fn upload_transform_table(
    gfx: &mut GfxContext,
    transforms: &[glam::Affine3A],
    temps: &mut Vec<imp::RawResource>,
) -> Result<u64, imp::Error> {
    let rows: Vec<[[f32; 4]; 3]> = transforms.iter().map(transform_rows).collect();
    stage_to_default_heap(gfx, bytemuck::cast_slice(&rows), temps)
}

fn record_build(
    gfx: &mut GfxContext,
    inputs: &imp::AccelInputs,
    temps: &mut Vec<imp::RawResource>,
) -> Result<AccelStructure, Error> {
    let info = gfx.device().accel_prebuild_info(inputs);
    let result = gfx.create_resource(
        imp::HeapType::Default,
        &imp::ResourceDesc::buffer_uav(info.result_size),
        imp::ResourceState::RaytracingAccelerationStructure,
    )?;
    let scratch = gfx.device().create_resource(
        imp::HeapType::Default,
        &imp::ResourceDesc::buffer_uav(info.scratch_size),
        imp::ResourceState::UnorderedAccess,
    )?;

    let dest_address = gfx.resource(result).gpu_address();
    let result_id = gfx.resource(result).id();
    let scratch_address = scratch.gpu_address();
    let kind = inputs.kind();
    let entry_count = inputs.entry_count();
    gfx.cmd().record(imp::Command::BuildAccelerationStructure {
        kind,
        dest_address,
        scratch_address,
        entry_count,
    });
    // Later builds (the TLAS over this BLAS) read the result; fence the
    // write before anything consumes it.
    gfx.cmd().record(imp::Command::UavBarrier {
        resource: Some(result_id),
    });

    temps.push(scratch);
    Ok(AccelStructure {
        buffer: result,
        gpu_address: dest_address,
    })
}

pub fn build_blas(
    gfx: &mut GfxContext,
    geometries: &[imp::GeometryDesc],
    temps: &mut Vec<imp::RawResource>,
) -> Result<AccelStructure, Error> {
    assert!(!geometries.is_empty(), "bottom-level build with no geometry");
    record_build(gfx, &imp::AccelInputs::BottomLevel(geometries), temps)
}

pub fn build_tlas(
    gfx: &mut GfxContext,
    instances: &[imp::RaytracingInstance],
    temps: &mut Vec<imp::RawResource>,
) -> Result<AccelStructure, Error> {
    assert!(!instances.is_empty(), "top-level build with no instances");
    let instance_buffer_address =
        stage_to_default_heap(gfx, bytemuck::cast_slice(instances), temps)?;
    record_build(
        gfx,
        &imp::AccelInputs::TopLevel {
            instance_buffer_address,
            instance_count: instances.len() as u32,
        },
        temps,
    )
}

/// The acceleration hierarchy for a scene.
pub struct SceneAccel {
    pub blas: AccelStructure,
    pub tlas: AccelStructure,
    temps: Vec<imp::RawResource>,
}

impl SceneAccel {
    pub fn build(gfx: &mut GfxContext, scene: &Scene) -> Result<SceneAccel, Error> {
        let objects = scene.objects.len() as u32;
        logwise::info_sync!("building acceleration structures for {objects} objects", objects = objects);
        let vertex_base = gfx.resource(scene.vertex_buffer).gpu_address();
        let index_base = gfx.resource(scene.index_buffer).gpu_address();

        // One geometry per (object, section) pair, each pointing at its
        // slot in the transform table.
        let mut temps = Vec::new();
        let mut transforms = Vec::new();
        let mut geometries = Vec::new();
        for object in &scene.objects {
            let mesh = &scene.meshes[object.mesh_index as usize];
            for section in mesh.sections.iter() {
                transforms.push(object.transform);
                geometries.push(imp::GeometryDesc {
                    vertex_buffer_address: vertex_base
                        + section.vertex_offset as u64 * VERTEX_STRIDE as u64,
                    vertex_count: scene.vertex_count - section.vertex_offset,
                    vertex_stride: VERTEX_STRIDE,
                    index_buffer_address: index_base + section.index_offset as u64 * 4,
                    index_count: section.index_count,
                    transform_address: 0,
                });
            }
        }
        let table = upload_transform_table(gfx, &transforms, &mut temps)?;
        for (i, geometry) in geometries.iter_mut().enumerate() {
            geometry.transform_address = table + i as u64 * 48;
        }
        let blas = build_blas(gfx, &geometries, &mut temps)?;

        let instance = imp::RaytracingInstance {
            transform: transform_rows(&glam::Affine3A::IDENTITY),
            instance_id_and_mask: 0xff << 24,
            contribution_and_flags: 0,
            acceleration_structure: blas.gpu_address,
        };
        let tlas = build_tlas(gfx, &[instance], &mut temps)?;

        Ok(SceneAccel { blas, tlas, temps })
    }

    /// Drop the scratch and staging buffers.  Call after the build
    /// commands have been flushed and waited on.
    pub fn release_temps(&mut self) {
        self.temps.clear();
    }

    pub fn release(self, gfx: &mut GfxContext) {
        gfx.release_resource(self.blas.buffer);
        gfx.release_resource(self.tlas.buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::ContextConfig;
    use crate::scene::{Material, Mesh, MeshSection, MeshSections, Object, SceneSource, Vertex};

    fn vertex() -> Vertex {
        bytemuck::Zeroable::zeroed()
    }

    fn two_triangle_scene() -> SceneSource {
        SceneSource {
            vertices: vec![vertex(); 4],
            indices: vec![0, 1, 2, 2, 1, 3],
            meshes: vec![Mesh {
                sections: MeshSections::Single(MeshSection {
                    index_offset: 0,
                    index_count: 6,
                    vertex_offset: 0,
                    material_index: 0,
                }),
            }],
            materials: vec![Material::default()],
            objects: vec![Object {
                mesh_index: 0,
                transform: glam::Affine3A::IDENTITY,
            }],
            textures: Vec::new(),
        }
    }

    #[test]
    fn transform_rows_are_row_major() {
        let t = glam::Affine3A::from_translation(glam::Vec3::new(1.0, 2.0, 3.0));
        let rows = transform_rows(&t);
        assert_eq!(rows[0], [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(rows[1], [0.0, 1.0, 0.0, 2.0]);
        assert_eq!(rows[2], [0.0, 0.0, 1.0, 3.0]);
    }

    #[test]
    fn scene_build_records_blas_then_tlas() {
        let mut gfx = GfxContext::new(ContextConfig::default()).unwrap();
        let scene = Scene::upload(&mut gfx, two_triangle_scene()).unwrap();
        let accel = SceneAccel::build(&mut gfx, &scene).unwrap();
        assert_ne!(accel.blas.gpu_address, accel.tlas.gpu_address);
        gfx.flush_and_wait();

        let builds: Vec<_> = gfx
            .queue()
            .executed()
            .into_iter()
            .filter_map(|c| match c {
                imp::Command::BuildAccelerationStructure {
                    kind, entry_count, ..
                } => Some((kind, entry_count)),
                _ => None,
            })
            .collect();
        assert_eq!(
            builds,
            vec![
                (imp::AccelKind::BottomLevel, 1),
                (imp::AccelKind::TopLevel, 1),
            ]
        );
    }

    #[test]
    fn every_object_section_pair_becomes_a_geometry() {
        let mut gfx = GfxContext::new(ContextConfig::default()).unwrap();
        let mut source = two_triangle_scene();
        source.vertices.resize(8, vertex());
        source.indices.extend_from_slice(&[0, 1, 2]);
        source.meshes[0].sections = MeshSections::Many(vec![
            MeshSection {
                index_offset: 0,
                index_count: 6,
                vertex_offset: 0,
                material_index: 0,
            },
            MeshSection {
                index_offset: 6,
                index_count: 3,
                vertex_offset: 4,
                material_index: 0,
            },
        ]);
        // Two placements of the two-section mesh: four geometries.
        source.objects.push(Object {
            mesh_index: 0,
            transform: glam::Affine3A::from_translation(glam::Vec3::X),
        });
        let scene = Scene::upload(&mut gfx, source).unwrap();
        let _accel = SceneAccel::build(&mut gfx, &scene).unwrap();
        gfx.flush_and_wait();

        let blas_entries = gfx.queue().executed().into_iter().find_map(|c| match c {
            imp::Command::BuildAccelerationStructure {
                kind: imp::AccelKind::BottomLevel,
                entry_count,
                ..
            } => Some(entry_count),
            _ => None,
        });
        assert_eq!(blas_entries, Some(4));
    }

    #[test]
    fn geometry_addresses_honor_section_offsets() {
        let mut gfx = GfxContext::new(ContextConfig::default()).unwrap();
        let mut source = two_triangle_scene();
        source.vertices.resize(8, vertex());
        source.indices.extend_from_slice(&[0, 1, 2]);
        source.meshes[0].sections = MeshSections::Many(vec![
            MeshSection {
                index_offset: 0,
                index_count: 6,
                vertex_offset: 0,
                material_index: 0,
            },
            MeshSection {
                index_offset: 6,
                index_count: 3,
                vertex_offset: 4,
                material_index: 0,
            },
        ]);
        let scene = Scene::upload(&mut gfx, source).unwrap();
        let vertex_base = gfx.resource(scene.vertex_buffer).gpu_address();
        let index_base = gfx.resource(scene.index_buffer).gpu_address();

        let section = scene.meshes[0].sections.iter().nth(1).copied().unwrap();
        let vertex_address = vertex_base + section.vertex_offset as u64 * VERTEX_STRIDE as u64;
        let index_address = index_base + section.index_offset as u64 * 4;
        assert_eq!(vertex_address, vertex_base + 4 * 48);
        assert_eq!(index_address, index_base + 24);
    }

    #[test]
    fn transform_table_is_staged_through_the_default_heap() {
        let mut gfx = GfxContext::new(ContextConfig::default()).unwrap();
        let mut temps = Vec::new();
        let table = upload_transform_table(
            &mut gfx,
            &[glam::Affine3A::IDENTITY, glam::Affine3A::from_translation(glam::Vec3::Y)],
            &mut temps,
        )
        .unwrap();
        assert_eq!(temps.len(), 1);
        assert_eq!(table, temps[0].gpu_address());
        gfx.flush_and_wait();
        let copied = gfx.queue().executed().into_iter().any(|c| {
            matches!(c, imp::Command::CopyBufferRegion { dst, size: 96, .. } if dst == temps[0].id())
        });
        assert!(copied);
    }

    #[test]
    fn temps_release_after_flush() {
        let mut gfx = GfxContext::new(ContextConfig::default()).unwrap();
        let scene = Scene::upload(&mut gfx, two_triangle_scene()).unwrap();
        let mut accel = SceneAccel::build(&mut gfx, &scene).unwrap();
        let with_temps = gfx.device().live_resource_count();
        gfx.flush_and_wait();
        accel.release_temps();
        // Two scratch buffers, the transform table and the instance
        // buffer all go away; the two result buffers stay.
        assert_eq!(gfx.device().live_resource_count(), with_temps - 4);
    }

    #[test]
    fn release_frees_result_buffers() {
        let mut gfx = GfxContext::new(ContextConfig::default()).unwrap();
        let scene = Scene::upload(&mut gfx, two_triangle_scene()).unwrap();
        let before = gfx.live_resources();
        let mut accel = SceneAccel::build(&mut gfx, &scene).unwrap();
        gfx.flush_and_wait();
        accel.release_temps();
        accel.release(&mut gfx);
        assert_eq!(gfx.live_resources(), before);
    }
}
