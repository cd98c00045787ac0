//! Shader loading and VkShaderModule creation.
//!
//! Loading is split in two steps: [`ShaderSource::load`] reads and validates
//! a SPIR-V file and infers its stage from the file name, then
//! [`Shader::new`] turns the words into a module on the device.

use std::ffi::CStr;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{CreationFailure, PipelineError};

/// Entry point of every shader module.
pub const ENTRY_POINT: &CStr = c"main";

/// Pipeline stage a shader runs in.
///
/// The set is closed; a file whose name maps to none of these is rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    Compute,
    Fragment,
    Geometry,
    Vertex,
}

impl ShaderStage {
    /// Infers the stage from a `<name>.<stage>.spv` file name.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnknownShaderStage`] for any other suffix.
    pub fn from_path(path: &Path) -> Result<Self, PipelineError> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();

        let stage = file_name
            .strip_suffix(".spv")
            .and_then(|stem| stem.rsplit_once('.'))
            .map(|(_, stage)| stage);

        match stage {
            Some("comp") => Ok(Self::Compute),
            Some("frag") => Ok(Self::Fragment),
            Some("geom") => Ok(Self::Geometry),
            Some("vert") => Ok(Self::Vertex),
            _ => Err(PipelineError::UnknownShaderStage(
                path.display().to_string(),
            )),
        }
    }

    pub fn to_vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            Self::Compute => vk::ShaderStageFlags::COMPUTE,
            Self::Fragment => vk::ShaderStageFlags::FRAGMENT,
            Self::Geometry => vk::ShaderStageFlags::GEOMETRY,
            Self::Vertex => vk::ShaderStageFlags::VERTEX,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Compute => "compute",
            Self::Fragment => "fragment",
            Self::Geometry => "geometry",
            Self::Vertex => "vertex",
        }
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// SPIR-V words read from disk, tagged with their stage.
#[derive(Clone, Debug)]
pub struct ShaderSource {
    pub path: PathBuf,
    pub stage: ShaderStage,
    pub code: Vec<u32>,
}

impl ShaderSource {
    /// Reads a whole SPIR-V file.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::ShaderLoad`] if the file cannot be read
    /// - [`PipelineError::UnknownShaderStage`] if the name carries no stage
    /// - [`PipelineError::InvalidSpirv`] if the bytes are not SPIR-V words
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let stage = ShaderStage::from_path(path)?;

        let bytes = std::fs::read(path).map_err(|source| PipelineError::ShaderLoad {
            path: path.to_path_buf(),
            source,
        })?;

        let code = Self::words(&bytes)?;
        debug!(
            "Read {} shader {} ({} words)",
            stage,
            path.display(),
            code.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            stage,
            code,
        })
    }

    /// Decodes SPIR-V bytes, checking alignment and the magic number.
    pub fn words(bytes: &[u8]) -> Result<Vec<u32>, PipelineError> {
        ash::util::read_spv(&mut Cursor::new(bytes))
            .map_err(|e| PipelineError::InvalidSpirv(e.to_string()))
    }
}

/// A shader module bound to one stage.
pub struct Shader {
    device: Arc<Device>,
    module: vk::ShaderModule,
    stage: ShaderStage,
}

impl Shader {
    /// Creates a module from loaded SPIR-V.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ShaderModuleCreationFailed`].
    pub fn new(device: Arc<Device>, source: &ShaderSource) -> Result<Self, PipelineError> {
        let create_info = vk::ShaderModuleCreateInfo::default().code(&source.code);

        let module = unsafe { device.handle().create_shader_module(&create_info, None) }
            .map_err(|e| PipelineError::ShaderModuleCreationFailed(CreationFailure::from(e)))?;

        info!(
            "Created {} shader module from {}",
            source.stage,
            source.path.display()
        );

        Ok(Self {
            device,
            module,
            stage: source.stage,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    #[inline]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Stage info for pipeline creation, entering at [`ENTRY_POINT`].
    pub fn stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo<'static> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage.to_vk_stage())
            .module(self.module)
            .name(ENTRY_POINT)
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_shader_module(self.module, None);
        }
        debug!("Destroyed {} shader module", self.stage);
    }
}
