/// Fallback-backend program wrapper: a pipeline with every bind group it can
/// ever draw with resolved at link time, so the steady-state loop never
/// performs a lookup-and-create while a frame is being encoded.
pub(crate) struct LinkedProgram {
    pipeline: wgpu::RenderPipeline,
    uniform_bind: wgpu::BindGroup,
    inputs: Vec<(u64, wgpu::BindGroup)>,
}

impl LinkedProgram {
    pub fn link(
        device: &wgpu::Device,
        label: &'static str,
        pipeline: wgpu::RenderPipeline,
        uniform_bind: wgpu::BindGroup,
        input_layout: &wgpu::BindGroupLayout,
        sampler: &wgpu::Sampler,
        candidates: &[(u64, &wgpu::TextureView)],
    ) -> Self {
        let inputs = build_input_binds(device, label, input_layout, sampler, candidates);
        Self {
            pipeline,
            uniform_bind,
            inputs,
        }
    }

    pub fn pipeline(&self) -> &wgpu::RenderPipeline {
        &self.pipeline
    }

    pub fn uniform_bind(&self) -> &wgpu::BindGroup {
        &self.uniform_bind
    }

    /// Pre-resolved bind group for the given input texture identity.
    pub fn input(&self, id: u64) -> Option<&wgpu::BindGroup> {
        self.inputs
            .iter()
            .find(|(candidate, _)| *candidate == id)
            .map(|(_, bind)| bind)
    }

    /// Re-resolves the input set after textures changed identity (resize).
    pub fn relink_inputs(
        &mut self,
        device: &wgpu::Device,
        label: &'static str,
        input_layout: &wgpu::BindGroupLayout,
        sampler: &wgpu::Sampler,
        candidates: &[(u64, &wgpu::TextureView)],
    ) {
        self.inputs = build_input_binds(device, label, input_layout, sampler, candidates);
    }
}

fn build_input_binds(
    device: &wgpu::Device,
    label: &'static str,
    input_layout: &wgpu::BindGroupLayout,
    sampler: &wgpu::Sampler,
    candidates: &[(u64, &wgpu::TextureView)],
) -> Vec<(u64, wgpu::BindGroup)> {
    candidates
        .iter()
        .map(|(id, view)| {
            let bind = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: input_layout,
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
            });
            (*id, bind)
        })
        .collect()
}
