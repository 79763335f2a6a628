// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! End to end over a tiny scene: one mesh with one two-triangle section
//! and one untextured material, instanced once.  Upload, acceleration
//! builds, a few presented frames, teardown.

use rays_and_frames::accel::SceneAccel;
use rays_and_frames::gfx::{ContextConfig, GfxContext};
use rays_and_frames::imp;
use rays_and_frames::pixel_formats::PixelFormat;
use rays_and_frames::renderer::{RayTracer, RendererShaders};
use rays_and_frames::scene::{
    Material, Mesh, MeshSection, MeshSections, Object, Scene, SceneSource, TextureData, Vertex,
    VERTEX_STRIDE,
};
use rays_and_frames::ui::UiDrawData;

fn quad_source() -> SceneSource {
    let vertex = |x: f32, y: f32| Vertex {
        position: [x, y, 0.0],
        normal: [0.0, 0.0, 1.0],
        texcoord: [x, y],
        tangent: [1.0, 0.0, 0.0, 1.0],
    };
    SceneSource {
        vertices: vec![
            vertex(0.0, 0.0),
            vertex(1.0, 0.0),
            vertex(0.0, 1.0),
            vertex(1.0, 1.0),
        ],
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
            transform: glam::Affine3A::from_translation(glam::Vec3::new(0.0, 0.0, -3.0)),
        }],
        textures: Vec::new(),
    }
}

fn shaders() -> RendererShaders {
    RendererShaders {
        raytracing_library: b"rt library".to_vec(),
        overlay_vs: b"overlay vs".to_vec(),
        overlay_ps: b"overlay ps".to_vec(),
        downsample_cs: b"downsample cs".to_vec(),
    }
}

fn font() -> TextureData {
    TextureData {
        width: 32,
        height: 32,
        rgba: vec![0xff; 32 * 32 * 4],
    }
}

#[test]
fn srv_element_counts_match_the_geometry() {
    let mut gfx = GfxContext::new(ContextConfig::default()).unwrap();
    let scene = Scene::upload(&mut gfx, quad_source()).unwrap();

    let views = gfx.device().view_records();
    let buffer_views: Vec<&imp::SrvDesc> = views
        .iter()
        .filter_map(|v| match &v.kind {
            imp::ViewKind::Srv(desc @ imp::SrvDesc::Buffer { .. }) => Some(desc),
            _ => None,
        })
        .collect();
    // Vertex view: one structured element per vertex.  Index view: one
    // Rgb32Uint element per triangle.  Transform view: one 3x4 matrix
    // per placed object.
    assert_eq!(
        buffer_views,
        vec![
            &imp::SrvDesc::Buffer {
                format: PixelFormat::Unknown,
                first_element: 0,
                element_count: 4,
                stride: VERTEX_STRIDE,
            },
            &imp::SrvDesc::Buffer {
                format: PixelFormat::Rgb32Uint,
                first_element: 0,
                element_count: 2,
                stride: 0,
            },
            &imp::SrvDesc::Buffer {
                format: PixelFormat::Unknown,
                first_element: 0,
                element_count: 1,
                stride: 48,
            },
        ]
    );
    scene.release(&mut gfx);
}

#[test]
fn accel_hierarchy_is_one_blas_one_instance() {
    let mut gfx = GfxContext::new(ContextConfig::default()).unwrap();
    let scene = Scene::upload(&mut gfx, quad_source()).unwrap();
    let mut accel = SceneAccel::build(&mut gfx, &scene).unwrap();
    gfx.flush_and_wait();
    accel.release_temps();

    let builds: Vec<(imp::AccelKind, u32)> = gfx
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

    accel.release(&mut gfx);
    scene.release(&mut gfx);
}

#[test]
fn renders_frames_and_tears_down_clean() {
    let mut gfx = GfxContext::new(ContextConfig {
        resolution: (320, 240),
        ..ContextConfig::default()
    })
    .unwrap();
    let baseline = gfx.live_resources();
    let mut renderer = RayTracer::new(&mut gfx, &shaders(), quad_source(), &font()).unwrap();

    for _ in 0..6 {
        renderer
            .draw_frame(&mut gfx, &UiDrawData::default())
            .unwrap();
    }
    assert_eq!(renderer.frame_count(), 6);

    let dispatches: Vec<u64> = gfx
        .queue()
        .executed()
        .into_iter()
        .filter_map(|c| match c {
            imp::Command::DispatchRays { hit_group_size, .. } => Some(hit_group_size),
            _ => None,
        })
        .collect();
    // One section pair: every frame's hit region holds a radiance and a
    // shadow record.
    assert_eq!(dispatches, vec![128; 6]);

    renderer.shutdown(&mut gfx);
    assert_eq!(gfx.live_resources(), baseline);
    assert_eq!(gfx.live_pipelines(), 0);
}

#[test]
fn raytracing_unsupported_fails_fast() {
    let result = GfxContext::new(ContextConfig {
        device_options: imp::DeviceOptions {
            supports_raytracing: false,
        },
        ..ContextConfig::default()
    });
    assert!(matches!(
        result,
        Err(rays_and_frames::Error::RaytracingUnsupported)
    ));
}

#[test]
fn inconsistent_scenes_never_reach_the_gpu() {
    let mut gfx = GfxContext::new(ContextConfig::default()).unwrap();
    let live_before = gfx.device().live_resource_count();
    let mut source = quad_source();
    source.objects[0].mesh_index = 5;
    assert!(Scene::upload(&mut gfx, source).is_err());
    assert_eq!(gfx.device().live_resource_count(), live_before);
}
