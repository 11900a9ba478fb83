//! Primary path: Vulkan/Metal/DX12 through wgpu.
//!
//! Pipeline compilation happens on a dedicated builder thread so `Init` can
//! acknowledge quickly; the first frame blocks until every pipeline landed.

use std::collections::HashMap;
use std::sync::mpsc;
use std::thread;

use protocol::{
    BackendKind, CapturedFrame, FrameHandle, FrameParams, PipelineConfig, ResizeRequest,
    SurfaceHandle,
};
use tracing::debug;

use crate::backend::{FaultFlag, RenderBackend};
use crate::gpu::context::GpuContext;
use crate::gpu::passes::{
    capture_len, encode_pass, read_back, OffscreenTarget, PassId, PassLayouts, PassShaders,
    PassUniformBuffers, PingPong, SourceTexture, INTERMEDIATE_FORMAT,
};
use crate::gpu::uniforms::PassUniforms;
use crate::opt::{BufferPool, ResourceCache, UniformTracker};
use crate::RendererError;

type PipelineKey = (PassId, wgpu::TextureFormat);
type BuildResult = Result<(PipelineKey, wgpu::RenderPipeline), RendererError>;

pub(crate) struct PrimaryBackend {
    context: GpuContext,
    layouts: PassLayouts,
    sampler: wgpu::Sampler,
    config: PipelineConfig,
    source: SourceTexture,
    ping_pong: PingPong,
    capture_target: OffscreenTarget,
    blocks: PassUniformBuffers,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    pending_builds: Option<mpsc::Receiver<BuildResult>>,
    expected_builds: usize,
    input_binds: ResourceCache<u64, wgpu::BindGroup>,
    tracker: UniformTracker,
    pool: BufferPool,
    fault: FaultFlag,
    has_frame: bool,
}

impl PrimaryBackend {
    pub fn new(
        config: &PipelineConfig,
        handle: &SurfaceHandle,
        fault: &FaultFlag,
    ) -> Result<Self, RendererError> {
        let context = GpuContext::new(BackendKind::Primary, handle, fault)?;
        let layouts = PassLayouts::new(&context.device);
        let shaders = PassShaders::compile(&context.device)?;
        let sampler = context.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("pass sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let blocks = PassUniformBuffers::new(&context.device, &layouts);
        let (target_width, target_height) = config.target();
        let source = SourceTexture::new(&context.device, config.native_width, config.native_height);
        let ping_pong = PingPong::new(&context.device, target_width, target_height);
        let capture_target = OffscreenTarget::new(&context.device, target_width, target_height, true);

        // Intermediate-format variants serve both the inner passes and the
        // capture re-render; the surface-format variants serve presentation.
        let surface_format = context.surface_format();
        let mut keys: Vec<PipelineKey> = vec![
            (PassId::Upscale, INTERMEDIATE_FORMAT),
            (PassId::Unsharp, INTERMEDIATE_FORMAT),
            (PassId::Color, INTERMEDIATE_FORMAT),
            (PassId::Crt, INTERMEDIATE_FORMAT),
            (PassId::Blit, INTERMEDIATE_FORMAT),
        ];
        for pass in [PassId::Crt, PassId::Blit] {
            if !keys.contains(&(pass, surface_format)) {
                keys.push((pass, surface_format));
            }
        }
        let expected_builds = keys.len();
        let (build_tx, build_rx) = mpsc::channel();
        let build_device = context.device.clone();
        let build_layouts = layouts.clone();
        thread::Builder::new()
            .name("scanview-pipelines".to_string())
            .spawn(move || {
                for (pass, format) in keys {
                    let result = build_layouts
                        .build_pipeline(&build_device, &shaders, pass, format)
                        .map(|pipeline| ((pass, format), pipeline));
                    if build_tx.send(result).is_err() {
                        return;
                    }
                }
            })
            .map_err(|err| RendererError::PipelineBuild {
                pass: "builder",
                message: err.to_string(),
            })?;

        Ok(Self {
            context,
            layouts,
            sampler,
            config: *config,
            source,
            ping_pong,
            capture_target,
            blocks,
            pipelines: HashMap::new(),
            pending_builds: Some(build_rx),
            expected_builds,
            input_binds: ResourceCache::new(),
            tracker: UniformTracker::new(),
            pool: BufferPool::with_sizes(&[capture_len(target_width, target_height)]),
            fault: fault.clone(),
            has_frame: false,
        })
    }

    /// Blocks until the builder thread delivered every pipeline.
    fn ensure_ready(&mut self) -> Result<(), RendererError> {
        let Some(receiver) = self.pending_builds.take() else {
            return Ok(());
        };
        while self.pipelines.len() < self.expected_builds {
            match receiver.recv() {
                Ok(Ok((key, pipeline))) => {
                    self.pipelines.insert(key, pipeline);
                }
                Ok(Err(err)) => return Err(err),
                Err(_) => {
                    return Err(RendererError::PipelineBuild {
                        pass: "builder",
                        message: "pipeline builder thread exited early".to_string(),
                    });
                }
            }
        }
        debug!(pipelines = self.pipelines.len(), "pipeline set ready");
        Ok(())
    }

    fn encode_chain(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        params: &FrameParams,
        final_view: &wgpu::TextureView,
        final_format: wgpu::TextureFormat,
    ) -> Result<(), RendererError> {
        let uniforms = PassUniforms::derive(params, &self.config);
        self.blocks
            .write_changed(&self.context.queue, &mut self.tracker, &uniforms);

        let Self {
            context,
            layouts,
            sampler,
            source,
            ping_pong,
            blocks,
            pipelines,
            input_binds,
            ..
        } = self;

        let source_bind = input_bind(
            input_binds,
            &context.device,
            &layouts.input,
            sampler,
            source.id(),
            source.view(),
        );
        encode_pass(
            encoder,
            PassId::Upscale,
            pipeline(pipelines, PassId::Upscale, INTERMEDIATE_FORMAT)?,
            blocks.upscale.bind(),
            source_bind,
            ping_pong.target(0).view(),
        );

        let mut current = 0usize;
        if params.unsharp_active() {
            let input = ping_pong.target(current);
            let bind = input_bind(
                input_binds,
                &context.device,
                &layouts.input,
                sampler,
                input.id(),
                input.view(),
            );
            encode_pass(
                encoder,
                PassId::Unsharp,
                pipeline(pipelines, PassId::Unsharp, INTERMEDIATE_FORMAT)?,
                blocks.unsharp.bind(),
                bind,
                ping_pong.target(current + 1).view(),
            );
            current += 1;
        }
        if params.color_active() {
            let input = ping_pong.target(current);
            let bind = input_bind(
                input_binds,
                &context.device,
                &layouts.input,
                sampler,
                input.id(),
                input.view(),
            );
            encode_pass(
                encoder,
                PassId::Color,
                pipeline(pipelines, PassId::Color, INTERMEDIATE_FORMAT)?,
                blocks.color.bind(),
                bind,
                ping_pong.target(current + 1).view(),
            );
            current += 1;
        }

        let final_pass = if params.crt_active() {
            PassId::Crt
        } else {
            PassId::Blit
        };
        let final_uniforms = if params.crt_active() {
            blocks.crt.bind()
        } else {
            blocks.upscale.bind()
        };
        let input = ping_pong.target(current);
        let bind = input_bind(
            input_binds,
            &context.device,
            &layouts.input,
            sampler,
            input.id(),
            input.view(),
        );
        encode_pass(
            encoder,
            final_pass,
            pipeline(pipelines, final_pass, final_format)?,
            final_uniforms,
            bind,
            final_view,
        );
        Ok(())
    }
}

impl RenderBackend for PrimaryBackend {
    fn upload_frame(&mut self, frame: &FrameHandle) -> Result<(), RendererError> {
        self.source.upload(&self.context.queue, frame)?;
        self.has_frame = true;
        Ok(())
    }

    fn render_frame(&mut self, params: &FrameParams) -> Result<(), RendererError> {
        if !self.has_frame {
            return Err(RendererError::RenderFailed("no frame uploaded".to_string()));
        }
        self.ensure_ready()?;
        if let Some(message) = self.fault.peek() {
            return Err(RendererError::DeviceLost(message));
        }
        let frame = self.context.acquire_frame()?;
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let format = self.context.surface_format();
        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame chain"),
            });
        self.encode_chain(&mut encoder, params, &view, format)?;
        self.context.queue.submit(Some(encoder.finish()));
        frame.present();
        Ok(())
    }

    fn resize(&mut self, request: &ResizeRequest) -> Result<(), RendererError> {
        self.config.apply_resize(request);
        self.context
            .resize_surface(request.surface_width, request.surface_height);
        let (target_width, target_height) = self.config.target();
        self.ping_pong = PingPong::new(&self.context.device, target_width, target_height);
        self.capture_target =
            OffscreenTarget::new(&self.context.device, target_width, target_height, true);
        self.input_binds.invalidate();
        self.tracker.reset();
        self.pool = BufferPool::with_sizes(&[capture_len(target_width, target_height)]);
        debug!(
            target_width,
            target_height,
            generation = self.input_binds.generation(),
            "primary targets rebuilt"
        );
        Ok(())
    }

    fn capture(&mut self, params: &FrameParams) -> Result<CapturedFrame, RendererError> {
        if !self.has_frame {
            return Err(RendererError::CaptureFailed("no frame uploaded".to_string()));
        }
        self.ensure_ready()?;
        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("capture chain"),
            });
        let view = self.capture_target.view().clone();
        self.encode_chain(&mut encoder, params, &view, INTERMEDIATE_FORMAT)?;
        self.context.queue.submit(Some(encoder.finish()));
        let Self {
            context,
            capture_target,
            pool,
            ..
        } = self;
        read_back(&context.device, &context.queue, capture_target, pool)
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Primary
    }

    fn finish(&mut self) {
        let _ = self.context.device.poll(wgpu::PollType::Wait);
    }
}

fn pipeline<'a>(
    pipelines: &'a HashMap<PipelineKey, wgpu::RenderPipeline>,
    pass: PassId,
    format: wgpu::TextureFormat,
) -> Result<&'a wgpu::RenderPipeline, RendererError> {
    pipelines
        .get(&(pass, format))
        .ok_or_else(|| RendererError::PipelineBuild {
            pass: pass.label(),
            message: format!("no pipeline built for {format:?}"),
        })
}

fn input_bind<'a>(
    cache: &'a mut ResourceCache<u64, wgpu::BindGroup>,
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    sampler: &wgpu::Sampler,
    id: u64,
    view: &wgpu::TextureView,
) -> &'a wgpu::BindGroup {
    cache.get_or_insert_with(id, || {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("pass input"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
        })
    })
}
