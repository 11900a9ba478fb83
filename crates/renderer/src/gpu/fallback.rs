//! Fallback path: OpenGL/GLES through wgpu with downlevel limits.
//!
//! No builder thread here. Drivers on this path serialize compilation anyway,
//! so every program is linked up front during `Init`, with all of its bind
//! groups resolved at link time.

use std::collections::HashMap;

use protocol::{
    BackendKind, CapturedFrame, FrameHandle, FrameParams, PipelineConfig, ResizeRequest,
    SurfaceHandle,
};
use tracing::debug;

use crate::backend::{FaultFlag, RenderBackend};
use crate::gpu::context::GpuContext;
use crate::gpu::passes::{
    capture_len, read_back, OffscreenTarget, PassId, PassLayouts, PassShaders, PassUniformBuffers,
    PingPong, SourceTexture, INTERMEDIATE_FORMAT,
};
use crate::gpu::uniforms::PassUniforms;
use crate::opt::{BufferPool, LinkedProgram, UniformTracker};
use crate::RendererError;

type ProgramKey = (PassId, wgpu::TextureFormat);

pub(crate) struct FallbackBackend {
    context: GpuContext,
    layouts: PassLayouts,
    sampler: wgpu::Sampler,
    config: PipelineConfig,
    source: SourceTexture,
    ping_pong: PingPong,
    capture_target: OffscreenTarget,
    blocks: PassUniformBuffers,
    programs: HashMap<ProgramKey, LinkedProgram>,
    tracker: UniformTracker,
    pool: BufferPool,
    fault: FaultFlag,
    has_frame: bool,
}

impl FallbackBackend {
    pub fn new(
        config: &PipelineConfig,
        handle: &SurfaceHandle,
        fault: &FaultFlag,
    ) -> Result<Self, RendererError> {
        let context = GpuContext::new(BackendKind::Gl, handle, fault)?;
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

        let surface_format = context.surface_format();
        let mut keys: Vec<ProgramKey> = vec![
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

        let candidates = [
            (source.id(), source.view()),
            (ping_pong.target(0).id(), ping_pong.target(0).view()),
            (ping_pong.target(1).id(), ping_pong.target(1).view()),
        ];
        let mut programs = HashMap::with_capacity(keys.len());
        for (pass, format) in keys {
            let pipeline = layouts.build_pipeline(&context.device, &shaders, pass, format)?;
            let uniform_bind = match pass {
                PassId::Upscale | PassId::Blit => blocks.upscale.bind().clone(),
                PassId::Unsharp => blocks.unsharp.bind().clone(),
                PassId::Color => blocks.color.bind().clone(),
                PassId::Crt => blocks.crt.bind().clone(),
            };
            let program = LinkedProgram::link(
                &context.device,
                pass.label(),
                pipeline,
                uniform_bind,
                &layouts.input,
                &sampler,
                &candidates,
            );
            programs.insert((pass, format), program);
        }
        debug!(programs = programs.len(), "fallback programs linked");

        Ok(Self {
            context,
            layouts,
            sampler,
            config: *config,
            source,
            ping_pong,
            capture_target,
            blocks,
            programs,
            tracker: UniformTracker::new(),
            pool: BufferPool::with_sizes(&[capture_len(target_width, target_height)]),
            fault: fault.clone(),
            has_frame: false,
        })
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

        encode_linked(
            encoder,
            PassId::Upscale,
            program(&self.programs, PassId::Upscale, INTERMEDIATE_FORMAT)?,
            self.source.id(),
            self.ping_pong.target(0).view(),
        )?;

        let mut current = 0usize;
        if params.unsharp_active() {
            encode_linked(
                encoder,
                PassId::Unsharp,
                program(&self.programs, PassId::Unsharp, INTERMEDIATE_FORMAT)?,
                self.ping_pong.target(current).id(),
                self.ping_pong.target(current + 1).view(),
            )?;
            current += 1;
        }
        if params.color_active() {
            encode_linked(
                encoder,
                PassId::Color,
                program(&self.programs, PassId::Color, INTERMEDIATE_FORMAT)?,
                self.ping_pong.target(current).id(),
                self.ping_pong.target(current + 1).view(),
            )?;
            current += 1;
        }

        let final_pass = if params.crt_active() {
            PassId::Crt
        } else {
            PassId::Blit
        };
        encode_linked(
            encoder,
            final_pass,
            program(&self.programs, final_pass, final_format)?,
            self.ping_pong.target(current).id(),
            final_view,
        )
    }
}

impl RenderBackend for FallbackBackend {
    fn upload_frame(&mut self, frame: &FrameHandle) -> Result<(), RendererError> {
        self.source.upload(&self.context.queue, frame)?;
        self.has_frame = true;
        Ok(())
    }

    fn render_frame(&mut self, params: &FrameParams) -> Result<(), RendererError> {
        if !self.has_frame {
            return Err(RendererError::RenderFailed("no frame uploaded".to_string()));
        }
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
        let candidates = [
            (self.source.id(), self.source.view()),
            (self.ping_pong.target(0).id(), self.ping_pong.target(0).view()),
            (self.ping_pong.target(1).id(), self.ping_pong.target(1).view()),
        ];
        for program in self.programs.values_mut() {
            program.relink_inputs(
                &self.context.device,
                "pass input",
                &self.layouts.input,
                &self.sampler,
                &candidates,
            );
        }
        self.tracker.reset();
        self.pool = BufferPool::with_sizes(&[capture_len(target_width, target_height)]);
        debug!(target_width, target_height, "fallback targets relinked");
        Ok(())
    }

    fn capture(&mut self, params: &FrameParams) -> Result<CapturedFrame, RendererError> {
        if !self.has_frame {
            return Err(RendererError::CaptureFailed("no frame uploaded".to_string()));
        }
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
        BackendKind::Gl
    }

    fn finish(&mut self) {
        let _ = self.context.device.poll(wgpu::PollType::Wait);
    }
}

fn program<'a>(
    programs: &'a HashMap<ProgramKey, LinkedProgram>,
    pass: PassId,
    format: wgpu::TextureFormat,
) -> Result<&'a LinkedProgram, RendererError> {
    programs
        .get(&(pass, format))
        .ok_or_else(|| RendererError::PipelineBuild {
            pass: pass.label(),
            message: format!("no program linked for {format:?}"),
        })
}

fn encode_linked(
    encoder: &mut wgpu::CommandEncoder,
    pass: PassId,
    program: &LinkedProgram,
    input_id: u64,
    view: &wgpu::TextureView,
) -> Result<(), RendererError> {
    let input = program.input(input_id).ok_or_else(|| {
        RendererError::RenderFailed(format!("input {input_id} not linked for {}", pass.label()))
    })?;
    crate::gpu::passes::encode_pass(
        encoder,
        pass,
        program.pipeline(),
        program.uniform_bind(),
        input,
        view,
    );
    Ok(())
}
