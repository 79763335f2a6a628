// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Frame lifecycle behavior across the public surface: the two-frame
//! throttle, per-frame heap recycling, and leak-free resource churn
//! inside a running frame loop.

use rays_and_frames::gfx::{ContextConfig, GfxContext, MAX_FRAMES_IN_FLIGHT};
use rays_and_frames::imp;

fn context() -> GfxContext {
    GfxContext::new(ContextConfig::default()).unwrap()
}

#[test]
fn throttle_holds_over_a_long_run() {
    let mut gfx = context();
    for _ in 0..1000 {
        gfx.begin_frame();
        gfx.end_frame();
        assert!(gfx.frames_in_flight() <= MAX_FRAMES_IN_FLIGHT);
    }
    gfx.wait_for_gpu();
    assert_eq!(gfx.frames_in_flight(), 0);
}

#[test]
fn per_frame_allocations_recycle_without_growth() {
    let mut gfx = context();
    let mut slot_offsets = [None, None];
    for _ in 0..20 {
        gfx.begin_frame();
        let slot = gfx.frame_index() as usize;
        let offset = gfx.upload(100_000).offset;
        let table = gfx.allocate_gpu_descriptors(16);
        // Every visit to a slot starts from the same place.
        match slot_offsets[slot] {
            None => slot_offsets[slot] = Some((offset, table.gpu)),
            Some(expected) => assert_eq!(expected, (offset, table.gpu)),
        }
        gfx.end_frame();
    }
}

#[test]
fn resource_churn_in_the_loop_does_not_leak() {
    let mut gfx = context();
    let baseline = gfx.live_resources();
    for _ in 0..50 {
        gfx.begin_frame();
        let scratch = gfx
            .create_resource(
                imp::HeapType::Default,
                &imp::ResourceDesc::buffer(4096),
                imp::ResourceState::Common,
            )
            .unwrap();
        gfx.transition_barrier(scratch, imp::ResourceState::CopyDest);
        gfx.end_frame();
        gfx.release_resource(scratch);
    }
    assert_eq!(gfx.live_resources(), baseline);
}

#[test]
fn pipeline_cache_is_stable_across_frames() {
    let mut gfx = context();
    let first = gfx.create_compute_pipeline(b"blit cs").unwrap();
    for _ in 0..10 {
        gfx.begin_frame();
        let handle = gfx.create_compute_pipeline(b"blit cs").unwrap();
        assert_eq!(handle, first);
        gfx.set_pipeline(handle);
        gfx.end_frame();
    }
    assert_eq!(gfx.live_pipelines(), 1);
}

#[test]
fn back_buffers_rotate_through_all_four() {
    let mut gfx = context();
    let mut seen = std::collections::HashSet::new();
    for _ in 0..4 {
        gfx.begin_frame();
        seen.insert(gfx.back_buffer());
        gfx.end_frame();
    }
    assert_eq!(seen.len(), 4);
}

#[test]
fn frames_alternate_descriptor_heaps() {
    let mut gfx = context();
    gfx.begin_frame();
    let heap_a = gfx.allocate_gpu_descriptors(1).gpu;
    gfx.end_frame();
    gfx.begin_frame();
    let heap_b = gfx.allocate_gpu_descriptors(1).gpu;
    gfx.end_frame();
    assert_ne!(heap_a, heap_b);
}
