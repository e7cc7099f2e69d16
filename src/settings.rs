//! Application Settings
//!
//! [`Settings`] gathers every knob the application reads at startup: the window, the surface
//! and depth formats, the clear color, the object instances to draw and how the negotiator
//! waits on asynchronous requests.
//!
//! ```rust,ignore
//! let settings = Settings {
//!     max_instances: 16,
//!     ..Settings::default()
//! };
//! settings.validate()?;
//! ```

use std::path::PathBuf;

use nalgebra_glm as glm;

use crate::error::InitError;
use crate::negotiator::WaitStrategy;

/// Environment variable holding the path of an OBJ file to draw instead of the pyramid.
pub const MESH_ENV: &str = "PYRAMID_MESH";
/// Environment variable overriding [`Settings::max_instances`].
pub const MAX_INSTANCES_ENV: &str = "PYRAMID_MAX_INSTANCES";

/// One drawn copy of the mesh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceSettings {
    pub translation: glm::Vec3,
    /// Tint multiplied into the vertex color.
    pub color: glm::Vec4,
}

impl InstanceSettings {
    pub fn new(translation: [f32; 3], color: [f32; 4]) -> Self {
        Self {
            translation: glm::Vec3::from(translation),
            color: glm::Vec4::from(color),
        }
    }

    /// Model matrix of the instance after spinning by `angle` radians.
    pub fn model(&self, angle: f32) -> glm::Mat4 {
        crate::math::model(&self.translation, angle)
    }
}

#[cfg(not(all(target_arch = "wasm32", feature = "webgl")))]
fn default_limits() -> wgpu::Limits {
    wgpu::Limits::default()
}

#[cfg(all(target_arch = "wasm32", feature = "webgl"))]
fn default_limits() -> wgpu::Limits {
    wgpu::Limits::downlevel_webgl2_defaults()
}

/// Startup configuration.
///
/// | Field              | Default                               |
/// |--------------------|---------------------------------------|
/// | `width`/`height`   | 640 x 480                             |
/// | `title`            | `"Learn WebGPU"`                      |
/// | `resizable`        | `false`                               |
/// | `clear_color`      | (0.9, 0.1, 0.2, 1.0)                  |
/// | `depth_format`     | `Depth24Plus`                         |
/// | `present_mode`     | `Fifo`                                |
/// | `max_instances`    | 8                                     |
/// | `instances`        | two pyramids at (-0.5,-0.5,-0.25) and (0.5,0.5,-0.25) |
/// | `wait_strategy`    | sleep 10ms natively, yield on wasm    |
/// | `mesh_path`        | `None` (built-in pyramid)             |
#[derive(Debug, Clone)]
pub struct Settings {
    pub width: u32,
    pub height: u32,
    pub title: String,
    pub resizable: bool,

    pub power_preference: wgpu::PowerPreference,
    pub required_features: wgpu::Features,
    pub required_limits: wgpu::Limits,

    pub clear_color: wgpu::Color,
    pub depth_format: wgpu::TextureFormat,
    pub present_mode: wgpu::PresentMode,

    /// Number of dynamic uniform records reserved in the uniform buffer.
    pub max_instances: u32,
    pub instances: Vec<InstanceSettings>,

    pub wait_strategy: WaitStrategy,
    pub mesh_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            title: "Learn WebGPU".to_string(),
            resizable: false,
            power_preference: wgpu::PowerPreference::default(),
            required_features: wgpu::Features::empty(),
            required_limits: default_limits(),
            clear_color: wgpu::Color {
                r: 0.9,
                g: 0.1,
                b: 0.2,
                a: 1.0,
            },
            depth_format: crate::pipeline::DEPTH_FORMAT,
            present_mode: wgpu::PresentMode::Fifo,
            max_instances: 8,
            instances: vec![
                InstanceSettings::new([-0.5, -0.5, -0.25], [1.0, 1.0, 1.0, 1.0]),
                InstanceSettings::new([0.5, 0.5, -0.25], [0.4, 0.8, 1.0, 1.0]),
            ],
            wait_strategy: WaitStrategy::default(),
            mesh_path: None,
        }
    }
}

impl Settings {
    /// Defaults overlaid with [`MESH_ENV`] and [`MAX_INSTANCES_ENV`].
    ///
    /// An unparsable instance count is logged and ignored.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Ok(path) = std::env::var(MESH_ENV) {
            settings.mesh_path = Some(PathBuf::from(path));
        }
        if let Ok(value) = std::env::var(MAX_INSTANCES_ENV) {
            match value.parse() {
                Ok(max_instances) => settings.max_instances = max_instances,
                Err(err) => log::warn!("Ignoring {MAX_INSTANCES_ENV}={value}: {err}"),
            }
        }
        settings
    }

    /// Rejects configurations the renderer cannot honor.
    pub fn validate(&self) -> Result<(), InitError> {
        if self.width == 0 || self.height == 0 {
            return Err(InitError::InvalidSettings(format!(
                "window size {}x{} is empty",
                self.width, self.height
            )));
        }
        if self.max_instances == 0 {
            return Err(InitError::InvalidSettings(
                "max_instances must be at least 1".to_string(),
            ));
        }
        if self.instances.len() > self.max_instances as usize {
            return Err(InitError::InvalidSettings(format!(
                "{} instances requested but only {} uniform records are reserved",
                self.instances.len(),
                self.max_instances
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!((settings.width, settings.height), (640, 480));
        assert_eq!(settings.instances.len(), 2);
        assert_eq!(settings.depth_format, wgpu::TextureFormat::Depth24Plus);
    }

    #[test]
    fn test_too_many_instances_rejected() {
        let settings = Settings {
            max_instances: 1,
            ..Settings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(InitError::InvalidSettings(_))
        ));
    }

    #[test]
    fn test_zero_window_rejected() {
        let settings = Settings {
            height: 0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_instance_model_is_translation() {
        let instance = InstanceSettings::new([0.5, 0.5, -0.25], [1.0; 4]);
        let model = instance.model(0.0);
        assert_eq!(model[(0, 3)], 0.5);
        assert_eq!(model[(1, 3)], 0.5);
        assert_eq!(model[(2, 3)], -0.25);
        assert_eq!(model[(3, 3)], 1.0);
    }
}
