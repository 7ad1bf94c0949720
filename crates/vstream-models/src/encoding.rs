//! Decode/encode engine configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default output width
pub const DEFAULT_WIDTH: u32 = 1280;
/// Default output height
pub const DEFAULT_HEIGHT: u32 = 720;
/// Default output frame rate
pub const DEFAULT_FPS: u32 = 30;

/// Hardware encoder and the artifact extension it produces
pub const HARDWARE_VIDEO_CODEC: &str = "hevc_nvenc";
pub const HARDWARE_ARTIFACT_EXTENSION: &str = "hevc";

/// Software fallback encoder and the artifact extension it produces
pub const SOFTWARE_VIDEO_CODEC: &str = "libx264";
pub const SOFTWARE_ARTIFACT_EXTENSION: &str = "h264";

/// Output frame geometry, passed opaquely to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for FrameGeometry {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fps: DEFAULT_FPS,
        }
    }
}

impl FrameGeometry {
    /// Size in bytes of one raw `yuv420p` frame.
    pub fn yuv420p_frame_size(&self) -> usize {
        let luma = self.width as usize * self.height as usize;
        luma + 2 * ((self.width as usize).div_ceil(2) * (self.height as usize).div_ceil(2))
    }

    /// `WIDTHxHEIGHT`, as FFmpeg expects it.
    pub fn size_arg(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// Which decode/encode implementation a worker should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// GPU decode and encode on the configured device
    #[default]
    Hardware,
    /// CPU decode and software encode
    Software,
    /// Probe for GPU support once, fall back to software when absent
    Auto,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Hardware => "hardware",
            EngineKind::Software => "software",
            EngineKind::Auto => "auto",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hardware" | "gpu" | "cuda" => Ok(EngineKind::Hardware),
            "software" | "cpu" => Ok(EngineKind::Software),
            "auto" => Ok(EngineKind::Auto),
            other => Err(format!("unknown engine kind '{}'", other)),
        }
    }
}

/// Engine configuration shared by every worker of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub geometry: FrameGeometry,
    /// GPU ordinal the engine binds to
    pub device_id: u32,
    pub kind: EngineKind,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            geometry: FrameGeometry::default(),
            device_id: 0,
            kind: EngineKind::default(),
        }
    }
}
