//! Scoped shader and pipeline construction.
//!
//! Every `create_*` call that can fail validation runs inside an error scope
//! so the failure surfaces as a typed error on the calling thread instead of
//! an uncaptured-error callback.

use crate::RendererError;

pub(crate) fn compile_shader(
    device: &wgpu::Device,
    pass: &'static str,
    source: &'static str,
) -> Result<wgpu::ShaderModule, RendererError> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(pass),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    match pollster::block_on(device.pop_error_scope()) {
        Some(error) => Err(RendererError::ShaderCompile {
            pass,
            message: error.to_string(),
        }),
        None => Ok(module),
    }
}

pub(crate) fn scoped_pipeline(
    device: &wgpu::Device,
    pass: &'static str,
    descriptor: &wgpu::RenderPipelineDescriptor<'_>,
) -> Result<wgpu::RenderPipeline, RendererError> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let pipeline = device.create_render_pipeline(descriptor);
    match pollster::block_on(device.pop_error_scope()) {
        Some(error) => Err(RendererError::PipelineBuild {
            pass,
            message: error.to_string(),
        }),
        None => Ok(pipeline),
    }
}
