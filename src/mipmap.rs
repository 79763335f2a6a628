// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Compute mipmap generation.
//!
//! One generator per pixel format.  It owns four scratch textures sized
//! 1024 down to 128 and a compute pipeline that downsamples up to four
//! mip levels per dispatch: read the current source mip of the target
//! texture, write the next one to four levels into scratch, copy the
//! scratch levels back into the texture, repeat until the 1x1 mip.
//!
//! Only square power-of-two textures up to 2048 are supported; the
//! scratch chain starts at half the largest source.

use crate::gfx::{GfxContext, PipelineHandle, ResourceHandle};
use crate::imp;
use crate::pixel_formats::PixelFormat;
use crate::Error;

const SCRATCH_BASE_SIZE: u32 = 1024;
const MAX_TEXTURE_SIZE: u64 = 2048;
const MAX_MIPS_PER_DISPATCH: u16 = 4;

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct DownsampleConstants {
    src_mip: u32,
    mip_count: u32,
    padding: [u32; 2],
}

pub struct MipmapGenerator {
    pipeline: PipelineHandle,
    scratch: [ResourceHandle; MAX_MIPS_PER_DISPATCH as usize],
    format: PixelFormat,
}

impl MipmapGenerator {
    pub fn new(
        gfx: &mut GfxContext,
        format: PixelFormat,
        downsample_cs: &[u8],
    ) -> Result<MipmapGenerator, Error> {
        let pipeline = gfx.create_compute_pipeline(downsample_cs)?;
        let mut scratch = Vec::with_capacity(MAX_MIPS_PER_DISPATCH as usize);
        for i in 0..MAX_MIPS_PER_DISPATCH as u32 {
            let size = SCRATCH_BASE_SIZE >> i;
            let desc = imp::ResourceDesc {
                allow_unordered_access: true,
                ..imp::ResourceDesc::texture_2d(format, size as u64, size, 1)
            };
            scratch.push(gfx.create_resource(
                imp::HeapType::Default,
                &desc,
                imp::ResourceState::UnorderedAccess,
            )?);
        }
        Ok(MipmapGenerator {
            pipeline,
            scratch: scratch.try_into().ok().unwrap(),
            format,
        })
    }

    /// Fill mips 1..n of `texture` from its mip 0.  The texture must be
    /// square, power-of-two, at most 2048 wide, in this generator's
    /// format, currently shader-readable, and actually have mips.
    pub fn generate(&self, gfx: &mut GfxContext, texture: ResourceHandle) {
        let desc = gfx.resource(texture).desc();
        assert_eq!(desc.kind, imp::ResourceKind::Texture2d);
        assert_eq!(desc.width, desc.height as u64, "texture must be square");
        assert!(desc.width.is_power_of_two(), "texture must be power-of-two");
        assert!(desc.width <= MAX_TEXTURE_SIZE, "texture is too large");
        assert!(desc.mip_levels > 1, "texture has no mips to generate");
        assert_eq!(desc.format, self.format, "wrong generator for this format");
        assert_eq!(
            gfx.resource_state(texture),
            imp::ResourceState::NonPixelShaderResource,
            "texture must be shader-readable before mip generation"
        );
        let texture_id = gfx.resource(texture).id();

        gfx.set_pipeline(self.pipeline);
        let mut src_mip: u16 = 0;
        while src_mip + 1 < desc.mip_levels {
            let batch = MAX_MIPS_PER_DISPATCH.min(desc.mip_levels - 1 - src_mip);

            let constants = gfx.upload(std::mem::size_of::<DownsampleConstants>() as u64);
            constants.write_pod(&DownsampleConstants {
                src_mip: src_mip as u32,
                mip_count: batch as u32,
                padding: [0; 2],
            });
            let constants_address = constants.gpu_address;

            // Descriptor table: texture SRV then one UAV per batch level.
            let table = gfx.allocate_gpu_descriptors(1 + batch as u32);
            let descriptor_size = gfx.cbv_srv_uav_descriptor_size() as u64;
            gfx.device().create_shader_resource_view(
                Some(gfx.resource(texture)),
                imp::SrvDesc::Texture2d {
                    format: desc.format,
                    mip_levels: desc.mip_levels as u32,
                },
                table.cpu,
            );
            // The shader writes each level into the top-left corner of
            // scratch texture i; the copy below moves just that region.
            for i in 0..batch as usize {
                gfx.device().create_unordered_access_view(
                    gfx.resource(self.scratch[i]),
                    imp::CpuDescriptor(table.cpu.0 + (1 + i as u64) * descriptor_size),
                );
            }

            gfx.cmd().record(imp::Command::SetComputeRootCbv {
                index: 0,
                gpu_address: constants_address,
            });
            gfx.cmd().record(imp::Command::SetComputeRootTable {
                index: 1,
                base: table.gpu,
            });
            let group_size = ((desc.width >> (src_mip + 1)) as u32).max(1).div_ceil(8);
            gfx.cmd().record(imp::Command::Dispatch {
                x: group_size,
                y: group_size,
                z: 1,
            });
            gfx.cmd().record(imp::Command::UavBarrier { resource: None });

            // Move the downsampled levels back into the texture.
            gfx.transition_barrier(texture, imp::ResourceState::CopyDest);
            for i in 0..batch as usize {
                let scratch = self.scratch[i];
                gfx.transition_barrier(scratch, imp::ResourceState::CopySource);
                let src = gfx.resource(scratch).id();
                gfx.cmd().record(imp::Command::CopyTextureRegion {
                    dst: texture_id,
                    dst_mip: (src_mip + 1 + i as u16) as u32,
                    src,
                    src_mip: 0,
                });
                gfx.transition_barrier(scratch, imp::ResourceState::UnorderedAccess);
            }
            gfx.transition_barrier(texture, imp::ResourceState::NonPixelShaderResource);

            src_mip += batch;
        }
    }

    pub fn release(self, gfx: &mut GfxContext) {
        for scratch in self.scratch {
            gfx.release_resource(scratch);
        }
        gfx.release_pipeline(self.pipeline);
    }
}
