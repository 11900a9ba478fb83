use serde::{Deserialize, Serialize};

/// Pass 1: nearest-neighbor integer upscale. Always runs; the flag exists so
/// presets stay symmetrical with the other passes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UpscalePass {
    pub enabled: bool,
}

/// Pass 2: unsharp-mask sharpening.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnsharpPass {
    pub enabled: bool,
    pub strength: f32,
}

/// Pass 3: color correction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorPass {
    pub enabled: bool,
    pub gamma: f32,
    pub saturation: f32,
    pub green_bias: f32,
    pub brightness: f32,
    pub contrast: f32,
}

/// Pass 4: CRT/LCD emulation. Skipped entirely (replaced by a plain blit)
/// when every strength parameter sits at zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CrtPass {
    pub enabled: bool,
    pub scanline_strength: f32,
    pub pixel_mask_strength: f32,
    pub bloom_strength: f32,
    pub curvature: f32,
    pub vignette_strength: f32,
}

impl CrtPass {
    pub const OFF: CrtPass = CrtPass {
        enabled: false,
        scanline_strength: 0.0,
        pixel_mask_strength: 0.0,
        bloom_strength: 0.0,
        curvature: 0.0,
        vignette_strength: 0.0,
    };

    /// True when the pass would visibly change anything.
    pub fn is_active(&self) -> bool {
        self.enabled
            && (self.scanline_strength > 0.0
                || self.pixel_mask_strength > 0.0
                || self.bloom_strength > 0.0
                || self.curvature > 0.0
                || self.vignette_strength > 0.0)
    }
}

/// One immutable catalog entry bundling the four pass configs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Preset {
    pub id: &'static str,
    pub name: &'static str,
    pub upscale: UpscalePass,
    pub unsharp: UnsharpPass,
    pub color: ColorPass,
    pub crt: CrtPass,
}

pub const DEFAULT_PRESET_ID: &str = "pixel-perfect";

const NEUTRAL_COLOR: ColorPass = ColorPass {
    enabled: false,
    gamma: 1.0,
    saturation: 1.0,
    green_bias: 0.0,
    brightness: 1.0,
    contrast: 1.0,
};

const CATALOG: [Preset; 5] = [
    Preset {
        id: "pixel-perfect",
        name: "Pixel Perfect",
        upscale: UpscalePass { enabled: true },
        unsharp: UnsharpPass {
            enabled: false,
            strength: 0.0,
        },
        color: NEUTRAL_COLOR,
        crt: CrtPass::OFF,
    },
    Preset {
        id: "sharp",
        name: "Sharp",
        upscale: UpscalePass { enabled: true },
        unsharp: UnsharpPass {
            enabled: true,
            strength: 0.45,
        },
        color: NEUTRAL_COLOR,
        crt: CrtPass::OFF,
    },
    Preset {
        id: "vivid",
        name: "Vivid",
        upscale: UpscalePass { enabled: true },
        unsharp: UnsharpPass {
            enabled: true,
            strength: 0.25,
        },
        color: ColorPass {
            enabled: true,
            gamma: 1.08,
            saturation: 1.3,
            green_bias: 0.0,
            brightness: 1.05,
            contrast: 1.1,
        },
        crt: CrtPass::OFF,
    },
    Preset {
        id: "crt",
        name: "CRT",
        upscale: UpscalePass { enabled: true },
        unsharp: UnsharpPass {
            enabled: false,
            strength: 0.0,
        },
        color: ColorPass {
            enabled: true,
            gamma: 1.15,
            saturation: 1.15,
            green_bias: 0.0,
            brightness: 1.1,
            contrast: 1.05,
        },
        crt: CrtPass {
            enabled: true,
            scanline_strength: 0.55,
            pixel_mask_strength: 0.3,
            bloom_strength: 0.35,
            curvature: 0.12,
            vignette_strength: 0.25,
        },
    },
    Preset {
        id: "lcd-grid",
        name: "LCD Grid",
        upscale: UpscalePass { enabled: true },
        unsharp: UnsharpPass {
            enabled: false,
            strength: 0.0,
        },
        color: ColorPass {
            enabled: true,
            gamma: 1.0,
            saturation: 0.95,
            green_bias: 0.06,
            brightness: 1.0,
            contrast: 1.0,
        },
        crt: CrtPass {
            enabled: true,
            scanline_strength: 0.0,
            pixel_mask_strength: 0.5,
            bloom_strength: 0.0,
            curvature: 0.0,
            vignette_strength: 0.0,
        },
    },
];

/// The fixed, read-only preset catalog.
pub fn catalog() -> &'static [Preset] {
    &CATALOG
}

/// Looks up a catalog entry by id.
pub fn preset(id: &str) -> Option<&'static Preset> {
    CATALOG.iter().find(|entry| entry.id == id)
}

/// Snapshot of the active preset's parameters for one frame submission, with
/// the live brightness multiplier already folded into the color pass. The
/// catalog entry itself is never mutated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameParams {
    pub upscale: UpscalePass,
    pub unsharp: UnsharpPass,
    pub color: ColorPass,
    pub crt: CrtPass,
}

impl FrameParams {
    pub fn from_preset(preset: &Preset, brightness_multiplier: f32) -> Self {
        let mut color = preset.color;
        color.brightness *= brightness_multiplier.clamp(0.0, 2.0);
        Self {
            upscale: preset.upscale,
            unsharp: preset.unsharp,
            color,
            crt: preset.crt,
        }
    }

    pub fn unsharp_active(&self) -> bool {
        self.unsharp.enabled && self.unsharp.strength > 0.0
    }

    pub fn color_active(&self) -> bool {
        self.color.enabled
    }

    pub fn crt_active(&self) -> bool {
        self.crt.is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_preset_always_resolves() {
        let entry = preset(DEFAULT_PRESET_ID).expect("default preset must exist");
        assert_eq!(entry.id, DEFAULT_PRESET_ID);
    }

    #[test]
    fn unknown_preset_is_none() {
        assert!(preset("nonexistent").is_none());
    }

    #[test]
    fn catalog_ids_are_unique() {
        for (index, entry) in catalog().iter().enumerate() {
            assert!(
                catalog()[index + 1..].iter().all(|other| other.id != entry.id),
                "duplicate preset id {}",
                entry.id
            );
        }
    }

    #[test]
    fn brightness_multiplier_folds_without_mutating_the_preset() {
        let entry = preset("crt").unwrap();
        let before = entry.color.brightness;
        let params = FrameParams::from_preset(entry, 1.5);
        assert!((params.color.brightness - before * 1.5).abs() < 1e-6);
        assert_eq!(preset("crt").unwrap().color.brightness, before);
    }

    #[test]
    fn brightness_multiplier_is_clamped() {
        let entry = preset(DEFAULT_PRESET_ID).unwrap();
        let params = FrameParams::from_preset(entry, 9.0);
        assert!((params.color.brightness - entry.color.brightness * 2.0).abs() < 1e-6);
    }

    #[test]
    fn crt_activity_requires_a_nonzero_parameter() {
        let mut pass = CrtPass::OFF;
        pass.enabled = true;
        assert!(!pass.is_active());
        pass.vignette_strength = 0.1;
        assert!(pass.is_active());
    }

    #[test]
    fn presets_serialize_for_diagnostics() {
        let json = serde_json::to_string(preset("lcd-grid").unwrap()).unwrap();
        assert!(json.contains("\"pixel_mask_strength\":0.5"));
    }
}
