//! Live settings shared with the embedding application.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use protocol::DEFAULT_PRESET_ID;

/// Brightness multiplier readable from any thread, folded into each frame's
/// parameters at submission time. Stored as f32 bits; clamped to `0.0..=2.0`
/// on write so readers never see an out-of-range value.
#[derive(Debug, Clone)]
pub struct BrightnessHandle {
    bits: Arc<AtomicU32>,
}

impl BrightnessHandle {
    pub fn new(initial: f32) -> Self {
        Self {
            bits: Arc::new(AtomicU32::new(initial.clamp(0.0, 2.0).to_bits())),
        }
    }

    pub fn set(&self, value: f32) {
        self.bits
            .store(value.clamp(0.0, 2.0).to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

impl Default for BrightnessHandle {
    fn default() -> Self {
        Self::new(1.0)
    }
}

/// Where the orchestrator takes its startup values from.
pub trait SettingsSource {
    fn initial_preset(&self) -> &str;
    fn brightness_multiplier(&self) -> f32;
}

/// Fixed settings, for embedders without a preference store.
#[derive(Debug, Clone)]
pub struct StaticSettings {
    pub preset: String,
    pub brightness: f32,
}

impl Default for StaticSettings {
    fn default() -> Self {
        Self {
            preset: DEFAULT_PRESET_ID.to_string(),
            brightness: 1.0,
        }
    }
}

impl SettingsSource for StaticSettings {
    fn initial_preset(&self) -> &str {
        &self.preset
    }

    fn brightness_multiplier(&self) -> f32 {
        self.brightness
    }
}
