use serde::{Deserialize, Serialize};

/// Which GPU path the renderer should bring up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Modern explicit path: Vulkan/Metal/DX12 through wgpu.
    Primary,
    /// Legacy framebuffer path: OpenGL/GLES through wgpu with downlevel limits.
    Gl,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Primary => f.write_str("primary"),
            BackendKind::Gl => f.write_str("gl"),
        }
    }
}

/// Geometry and backend selection for one renderer session.
///
/// Immutable for the life of a session except for the target dimensions and
/// scale factor, which `resize` updates in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub native_width: u32,
    pub native_height: u32,
    pub target_width: u32,
    pub target_height: u32,
    /// Integer upscale factor, always >= 1. Pixel-perfect scaling only.
    pub scale_factor: u32,
    pub backend: BackendKind,
}

impl PipelineConfig {
    pub fn new(native: (u32, u32), scale_factor: u32, backend: BackendKind) -> Self {
        let scale_factor = scale_factor.max(1);
        Self {
            native_width: native.0,
            native_height: native.1,
            target_width: native.0 * scale_factor,
            target_height: native.1 * scale_factor,
            scale_factor,
            backend,
        }
    }

    pub fn target(&self) -> (u32, u32) {
        (self.target_width, self.target_height)
    }

    pub fn native(&self) -> (u32, u32) {
        (self.native_width, self.native_height)
    }

    /// Applies a resize in place; native resolution and backend never change.
    pub fn apply_resize(&mut self, request: &ResizeRequest) {
        self.target_width = request.target_width;
        self.target_height = request.target_height;
        self.scale_factor = request.scale_factor.max(1);
    }
}

/// Payload of `Command::Resize`: new surface geometry plus the target
/// dimensions the controller derived from it with the integer-scale rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeRequest {
    pub surface_width: u32,
    pub surface_height: u32,
    pub target_width: u32,
    pub target_height: u32,
    pub scale_factor: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_derives_target_from_scale() {
        let config = PipelineConfig::new((160, 144), 4, BackendKind::Primary);
        assert_eq!(config.target(), (640, 576));
        assert_eq!(config.scale_factor, 4);
    }

    #[test]
    fn scale_factor_is_clamped_to_one() {
        let config = PipelineConfig::new((320, 240), 0, BackendKind::Gl);
        assert_eq!(config.scale_factor, 1);
        assert_eq!(config.target(), (320, 240));
    }

    #[test]
    fn resize_updates_targets_in_place() {
        let mut config = PipelineConfig::new((160, 144), 4, BackendKind::Primary);
        config.apply_resize(&ResizeRequest {
            surface_width: 320,
            surface_height: 288,
            target_width: 320,
            target_height: 288,
            scale_factor: 2,
        });
        assert_eq!(config.target(), (320, 288));
        assert_eq!(config.scale_factor, 2);
        assert_eq!(config.native(), (160, 144));
    }
}
