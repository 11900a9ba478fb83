//! Per-pass uniform blocks, laid out for std140-compatible 16-byte alignment.

use bytemuck::{Pod, Zeroable};
use protocol::{FrameParams, PipelineConfig};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub(crate) struct UpscaleUniforms {
    pub source_size: [f32; 2],
    pub output_size: [f32; 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub(crate) struct UnsharpUniforms {
    /// 1 / output size, for neighbor sampling offsets.
    pub texel: [f32; 2],
    pub strength: f32,
    pub _padding: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub(crate) struct ColorUniforms {
    pub gamma: f32,
    pub saturation: f32,
    pub green_bias: f32,
    pub brightness: f32,
    pub contrast: f32,
    pub _padding: [f32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub(crate) struct CrtUniforms {
    pub output_size: [f32; 2],
    pub native_size: [f32; 2],
    pub scanline_strength: f32,
    pub pixel_mask_strength: f32,
    pub bloom_strength: f32,
    pub curvature: f32,
    pub vignette_strength: f32,
    pub scale_factor: f32,
    pub _padding: [f32; 2],
}

/// All four blocks for one frame, derived together so a pass sees geometry and
/// preset parameters from the same submission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct PassUniforms {
    pub upscale: UpscaleUniforms,
    pub unsharp: UnsharpUniforms,
    pub color: ColorUniforms,
    pub crt: CrtUniforms,
}

impl PassUniforms {
    pub fn derive(params: &FrameParams, config: &PipelineConfig) -> Self {
        let (native_w, native_h) = config.native();
        let (target_w, target_h) = config.target();
        let output_size = [target_w as f32, target_h as f32];
        Self {
            upscale: UpscaleUniforms {
                source_size: [native_w as f32, native_h as f32],
                output_size,
            },
            unsharp: UnsharpUniforms {
                texel: [1.0 / target_w.max(1) as f32, 1.0 / target_h.max(1) as f32],
                strength: if params.unsharp_active() {
                    params.unsharp.strength
                } else {
                    0.0
                },
                _padding: 0.0,
            },
            color: ColorUniforms {
                gamma: params.color.gamma,
                saturation: params.color.saturation,
                green_bias: params.color.green_bias,
                brightness: params.color.brightness,
                contrast: params.color.contrast,
                _padding: [0.0; 3],
            },
            crt: CrtUniforms {
                output_size,
                native_size: [native_w as f32, native_h as f32],
                scanline_strength: params.crt.scanline_strength,
                pixel_mask_strength: params.crt.pixel_mask_strength,
                bloom_strength: params.crt.bloom_strength,
                curvature: params.crt.curvature,
                vignette_strength: params.crt.vignette_strength,
                scale_factor: config.scale_factor as f32,
                _padding: [0.0; 2],
            },
        }
    }
}
