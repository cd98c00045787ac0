//! Static application configuration.
//!
//! Everything here is fixed at build time; [`AppConfig::from_env`] only lets a
//! shell override the frame cap and the validation toggle.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Number of swapchain images the engine asks for.
pub const BUFFER_COUNT: u32 = 3;

/// Environment variable overriding the frame cap.
pub const FPS_LIMIT_ENV: &str = "FRAMETECH_FPS_LIMIT";

/// Environment variable overriding the validation toggle.
pub const VALIDATION_ENV: &str = "FRAMETECH_VALIDATION";

/// Semantic version of the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl Version {
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Frame-rate cap applied by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FpsLimit {
    /// Render as fast as presentation allows.
    Unlimited,
    Fps30,
    #[default]
    Fps60,
    Fps120,
}

impl FpsLimit {
    /// Target frames per second, `None` when unlimited.
    pub fn fps(self) -> Option<u32> {
        match self {
            FpsLimit::Unlimited => None,
            FpsLimit::Fps30 => Some(30),
            FpsLimit::Fps60 => Some(60),
            FpsLimit::Fps120 => Some(120),
        }
    }

    /// Whether a cap is configured.
    pub fn is_limited(self) -> bool {
        self.fps().is_some()
    }

    /// Time allotted to one frame (`1000 / fps` ms), `None` when unlimited.
    pub fn frame_budget(self) -> Option<Duration> {
        self.fps()
            .map(|fps| Duration::from_secs_f64(1.0 / f64::from(fps)))
    }
}

impl fmt::Display for FpsLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fps() {
            Some(fps) => write!(f, "{fps} FPS"),
            None => f.write_str("unlimited"),
        }
    }
}

impl FromStr for FpsLimit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unlimited" | "none" | "0" => Ok(FpsLimit::Unlimited),
            "30" => Ok(FpsLimit::Fps30),
            "60" => Ok(FpsLimit::Fps60),
            "120" => Ok(FpsLimit::Fps120),
            other => Err(Error::Config(format!(
                "unsupported FPS limit '{other}' (expected unlimited, 30, 60 or 120)"
            ))),
        }
    }
}

/// Application-wide settings consumed at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub name: String,
    pub version: Version,
    pub window_width: u32,
    pub window_height: u32,
    pub fps_limit: FpsLimit,
    pub buffer_count: u32,
    pub enable_validation: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "FrameTech".to_string(),
            version: Version::new(0, 1, 0),
            window_width: 1280,
            window_height: 720,
            fps_limit: FpsLimit::default(),
            buffer_count: BUFFER_COUNT,
            enable_validation: cfg!(debug_assertions),
        }
    }
}

impl AppConfig {
    /// Default configuration with overrides from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides found through `lookup`.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(value) = lookup(FPS_LIMIT_ENV) {
            self.fps_limit = value.parse()?;
        }
        if let Some(value) = lookup(VALIDATION_ENV) {
            self.enable_validation = parse_flag(VALIDATION_ENV, &value)?;
        }
        Ok(self)
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => Err(Error::Config(format!("{key}: expected a boolean, got '{other}'"))),
    }
}
