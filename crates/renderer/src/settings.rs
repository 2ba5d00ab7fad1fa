//! Renderer configuration.

use std::path::PathBuf;
use std::time::Duration;

use lumen_core::{Error, Result};

/// Upper bound on frames the CPU may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

#[derive(Clone, Debug)]
pub struct RendererSettings {
    /// Command lists recorded round-robin; each waits on its previous use.
    pub frames_in_flight: usize,
    /// Directory watched for compiled shaders. `None` disables hot reload.
    pub shader_watch_dir: Option<PathBuf>,
    /// Quiet period before a changed shader is reported.
    pub hot_reload_debounce: Duration,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            shader_watch_dir: None,
            hot_reload_debounce: Duration::from_millis(200),
        }
    }
}

impl RendererSettings {
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_FRAMES_IN_FLIGHT).contains(&self.frames_in_flight) {
            return Err(Error::Config(format!(
                "frames_in_flight must be between 1 and {}, got {}",
                MAX_FRAMES_IN_FLIGHT, self.frames_in_flight
            )));
        }
        if let Some(dir) = &self.shader_watch_dir
            && !dir.is_dir()
        {
            return Err(Error::Config(format!(
                "shader watch directory {} does not exist",
                dir.display()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(RendererSettings::default().validate().is_ok());
    }

    #[test]
    fn test_frames_in_flight_bounds() {
        let zero = RendererSettings {
            frames_in_flight: 0,
            ..Default::default()
        };
        assert!(matches!(zero.validate(), Err(Error::Config(_))));

        let many = RendererSettings {
            frames_in_flight: MAX_FRAMES_IN_FLIGHT + 1,
            ..Default::default()
        };
        assert!(many.validate().is_err());
    }

    #[test]
    fn test_missing_watch_dir_is_rejected() {
        let settings = RendererSettings {
            shader_watch_dir: Some(PathBuf::from("/nonexistent/lumen/shaders")),
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }
}
