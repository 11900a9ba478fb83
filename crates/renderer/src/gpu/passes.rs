//! Shared pass plumbing: shader set, bind group layouts, offscreen targets and
//! the fullscreen-triangle draw both backends encode with.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;

use protocol::{CapturedFrame, FrameHandle};

use crate::gpu::compile::{compile_shader, scoped_pipeline};
use crate::gpu::uniforms::{
    ColorUniforms, CrtUniforms, PassUniforms, UnsharpUniforms, UpscaleUniforms,
};
use crate::opt::{BufferPool, UniformTracker};
use crate::RendererError;

/// Texture format used for every intermediate and capture target. Non-sRGB so
/// shader math operates on the raw values the source frames carry.
pub(crate) const INTERMEDIATE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

static RESOURCE_IDS: AtomicU64 = AtomicU64::new(1);

fn next_resource_id() -> u64 {
    RESOURCE_IDS.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum PassId {
    Upscale,
    Unsharp,
    Color,
    Crt,
    Blit,
}

impl PassId {
    pub fn label(self) -> &'static str {
        match self {
            PassId::Upscale => "upscale",
            PassId::Unsharp => "unsharp",
            PassId::Color => "color",
            PassId::Crt => "crt",
            PassId::Blit => "blit",
        }
    }
}

pub(crate) struct PassShaders {
    pub upscale: wgpu::ShaderModule,
    pub unsharp: wgpu::ShaderModule,
    pub color: wgpu::ShaderModule,
    pub crt: wgpu::ShaderModule,
    pub blit: wgpu::ShaderModule,
}

impl PassShaders {
    pub fn compile(device: &wgpu::Device) -> Result<Self, RendererError> {
        Ok(Self {
            upscale: compile_shader(device, "upscale", include_str!("../shaders/upscale.wgsl"))?,
            unsharp: compile_shader(device, "unsharp", include_str!("../shaders/unsharp.wgsl"))?,
            color: compile_shader(device, "color", include_str!("../shaders/color.wgsl"))?,
            crt: compile_shader(device, "crt", include_str!("../shaders/crt.wgsl"))?,
            blit: compile_shader(device, "blit", include_str!("../shaders/blit.wgsl"))?,
        })
    }

    pub fn module(&self, pass: PassId) -> &wgpu::ShaderModule {
        match pass {
            PassId::Upscale => &self.upscale,
            PassId::Unsharp => &self.unsharp,
            PassId::Color => &self.color,
            PassId::Crt => &self.crt,
            PassId::Blit => &self.blit,
        }
    }
}

/// Bind group layouts shared by all five pipelines: group 0 holds the pass
/// uniform block, group 1 the input texture and sampler.
#[derive(Clone)]
pub(crate) struct PassLayouts {
    pub uniforms: wgpu::BindGroupLayout,
    pub input: wgpu::BindGroupLayout,
    pipeline: wgpu::PipelineLayout,
}

impl PassLayouts {
    pub fn new(device: &wgpu::Device) -> Self {
        let uniforms = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("pass uniforms"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let input = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("pass input"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let pipeline = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("pass layout"),
            bind_group_layouts: &[&uniforms, &input],
            push_constant_ranges: &[],
        });
        Self {
            uniforms,
            input,
            pipeline,
        }
    }

    pub fn build_pipeline(
        &self,
        device: &wgpu::Device,
        shaders: &PassShaders,
        pass: PassId,
        format: wgpu::TextureFormat,
    ) -> Result<wgpu::RenderPipeline, RendererError> {
        let module = shaders.module(pass);
        scoped_pipeline(
            device,
            pass.label(),
            &wgpu::RenderPipelineDescriptor {
                label: Some(pass.label()),
                layout: Some(&self.pipeline),
                vertex: wgpu::VertexState {
                    module,
                    entry_point: Some("vs_main"),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    buffers: &[],
                },
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module,
                    entry_point: Some("fs_main"),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                multiview: None,
                cache: None,
            },
        )
    }
}

/// One uniform buffer with its group-0 bind group.
pub(crate) struct UniformBuffer {
    buffer: wgpu::Buffer,
    bind: wgpu::BindGroup,
}

impl UniformBuffer {
    pub fn new(
        device: &wgpu::Device,
        layouts: &PassLayouts,
        label: &'static str,
        size: u64,
    ) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &layouts.uniforms,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        });
        Self { buffer, bind }
    }

    pub fn write(&self, queue: &wgpu::Queue, bytes: &[u8]) {
        queue.write_buffer(&self.buffer, 0, bytes);
    }

    pub fn bind(&self) -> &wgpu::BindGroup {
        &self.bind
    }
}

/// The four per-pass uniform buffers of one session. The blit pass borrows
/// the upscale bind group; its shader reads no uniforms.
pub(crate) struct PassUniformBuffers {
    pub upscale: UniformBuffer,
    pub unsharp: UniformBuffer,
    pub color: UniformBuffer,
    pub crt: UniformBuffer,
}

impl PassUniformBuffers {
    pub fn new(device: &wgpu::Device, layouts: &PassLayouts) -> Self {
        Self {
            upscale: UniformBuffer::new(
                device,
                layouts,
                "upscale uniforms",
                std::mem::size_of::<UpscaleUniforms>() as u64,
            ),
            unsharp: UniformBuffer::new(
                device,
                layouts,
                "unsharp uniforms",
                std::mem::size_of::<UnsharpUniforms>() as u64,
            ),
            color: UniformBuffer::new(
                device,
                layouts,
                "color uniforms",
                std::mem::size_of::<ColorUniforms>() as u64,
            ),
            crt: UniformBuffer::new(
                device,
                layouts,
                "crt uniforms",
                std::mem::size_of::<CrtUniforms>() as u64,
            ),
        }
    }

    /// Uploads each block whose bytes changed since the previous frame.
    pub fn write_changed(
        &self,
        queue: &wgpu::Queue,
        tracker: &mut UniformTracker,
        blocks: &PassUniforms,
    ) {
        let upscale = bytemuck::bytes_of(&blocks.upscale);
        if tracker.changed("upscale", upscale) {
            self.upscale.write(queue, upscale);
        }
        let unsharp = bytemuck::bytes_of(&blocks.unsharp);
        if tracker.changed("unsharp", unsharp) {
            self.unsharp.write(queue, unsharp);
        }
        let color = bytemuck::bytes_of(&blocks.color);
        if tracker.changed("color", color) {
            self.color.write(queue, color);
        }
        let crt = bytemuck::bytes_of(&blocks.crt);
        if tracker.changed("crt", crt) {
            self.crt.write(queue, crt);
        }
    }
}

/// Native-resolution texture receiving uploaded frames.
pub(crate) struct SourceTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    id: u64,
    width: u32,
    height: u32,
}

impl SourceTexture {
    pub fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("source frame"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: INTERMEDIATE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            id: next_resource_id(),
            width,
            height,
        }
    }

    /// Writes the frame's pixels into the texture. The frame must match the
    /// texture's native dimensions exactly.
    pub fn upload(&self, queue: &wgpu::Queue, frame: &FrameHandle) -> Result<(), RendererError> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(RendererError::FrameSizeMismatch {
                expected: (self.width, self.height),
                actual: (frame.width(), frame.height()),
            });
        }
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            frame.bytes(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(self.width * 4),
                rows_per_image: Some(self.height),
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Target-resolution texture usable both as a render attachment and as the
/// next pass's input. `copy_src` additionally allows capture readback.
pub(crate) struct OffscreenTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    id: u64,
    width: u32,
    height: u32,
}

impl OffscreenTarget {
    pub fn new(device: &wgpu::Device, width: u32, height: u32, copy_src: bool) -> Self {
        let mut usage = wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING;
        if copy_src {
            usage |= wgpu::TextureUsages::COPY_SRC;
        }
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("pass target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: INTERMEDIATE_FORMAT,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            id: next_resource_id(),
            width,
            height,
        }
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Two target-resolution textures alternating between render output and pass
/// input, so no pass ever samples the texture it writes.
pub(crate) struct PingPong {
    targets: [OffscreenTarget; 2],
}

impl PingPong {
    pub fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        Self {
            targets: [
                OffscreenTarget::new(device, width, height, true),
                OffscreenTarget::new(device, width, height, true),
            ],
        }
    }

    pub fn target(&self, index: usize) -> &OffscreenTarget {
        &self.targets[index % 2]
    }
}

/// Records one fullscreen-triangle pass into `encoder`.
pub(crate) fn encode_pass(
    encoder: &mut wgpu::CommandEncoder,
    pass: PassId,
    pipeline: &wgpu::RenderPipeline,
    uniform_bind: &wgpu::BindGroup,
    input_bind: &wgpu::BindGroup,
    view: &wgpu::TextureView,
) {
    let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(pass.label()),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            depth_slice: None,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    });
    render_pass.set_pipeline(pipeline);
    render_pass.set_bind_group(0, uniform_bind, &[]);
    render_pass.set_bind_group(1, input_bind, &[]);
    render_pass.draw(0..3, 0..1);
}

const ROW_ALIGN: u32 = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

/// Bytes of a tightly packed RGBA8 readback of a `width` by `height` target.
/// The staging pool is pre-warmed with this size for the current geometry.
pub(crate) fn capture_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 4
}

/// Copies an offscreen target back to the CPU as tightly-packed RGBA8.
///
/// Blocks until the copy completes; callers only reach this on an explicit
/// capture request, never in the steady-state frame loop.
pub(crate) fn read_back(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    target: &OffscreenTarget,
    pool: &mut BufferPool,
) -> Result<CapturedFrame, RendererError> {
    let (width, height) = target.size();
    let unpadded = width * 4;
    let padded = unpadded.div_ceil(ROW_ALIGN) * ROW_ALIGN;
    let readback = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("capture readback"),
        size: u64::from(padded) * u64::from(height),
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("capture copy"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture: target.texture(),
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &readback,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(Some(encoder.finish()));

    let slice = readback.slice(..);
    let (sender, receiver) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    device
        .poll(wgpu::PollType::Wait)
        .map_err(|err| RendererError::CaptureFailed(err.to_string()))?;
    receiver
        .recv()
        .map_err(|_| RendererError::CaptureFailed("map callback dropped".into()))?
        .map_err(|err| RendererError::CaptureFailed(err.to_string()))?;

    let staging = pool.acquire(capture_len(width, height))?;
    {
        let mapped = slice.get_mapped_range();
        for row in 0..height as usize {
            let src = row * padded as usize;
            let dst = row * unpadded as usize;
            staging[dst..dst + unpadded as usize]
                .copy_from_slice(&mapped[src..src + unpadded as usize]);
        }
    }
    readback.unmap();

    CapturedFrame::from_rgba8(width, height, staging.to_vec())
        .map_err(|err| RendererError::CaptureFailed(err.to_string()))
}
