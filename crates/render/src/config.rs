use glam::{Vec3, Vec4};
use serde::{Deserialize, Serialize};
use stagehand_common::SnapSettings;
use std::path::Path;

/// Errors from loading a viewport configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// One stage of the generic post-process chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PostEffectKind {
    /// Exponential tone mapping of HDR color into `[0, 1]`.
    Tonemap { exposure: f32 },
    ColorGrade {
        saturation: f32,
        contrast: f32,
        tint: Vec3,
    },
    Vignette { strength: f32, radius: f32 },
    /// Luminance-edge-aware blur, a cheap FXAA stand-in.
    EdgeBlur { threshold: f32 },
}

impl PostEffectKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Tonemap { .. } => "tonemap",
            Self::ColorGrade { .. } => "color_grade",
            Self::Vignette { .. } => "vignette",
            Self::EdgeBlur { .. } => "edge_blur",
        }
    }
}

/// Effect entry as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostEffectDesc {
    #[serde(flatten)]
    pub kind: PostEffectKind,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl PostEffectDesc {
    pub fn new(kind: PostEffectKind) -> Self {
        Self {
            kind,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlineConfig {
    pub enabled: bool,
    pub color: Vec4,
    /// Edge search distance in pixels.
    pub width: u32,
}

impl Default for OutlineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            color: Vec4::new(1.0, 0.6, 0.1, 1.0),
            width: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemporalConfig {
    pub enabled: bool,
    /// Weight of the reprojected history in `[0, 1)`.
    pub blend: f32,
}

impl Default for TemporalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            blend: 0.8,
        }
    }
}

/// On-screen sizes of the manipulation handles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GizmoConfig {
    /// Axis handle length in pixels.
    pub handle_pixels: f32,
    /// Hit tolerance around handles in pixels.
    pub pick_tolerance_pixels: f32,
}

impl Default for GizmoConfig {
    fn default() -> Self {
        Self {
            handle_pixels: 100.0,
            pick_tolerance_pixels: 6.0,
        }
    }
}

/// Explicit configuration passed into the pipeline and each frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewportConfig {
    /// Render resolution relative to the display size.
    pub render_scale: f32,
    pub clear_color: Vec4,
    pub post_effects: Vec<PostEffectDesc>,
    pub outline: OutlineConfig,
    pub temporal: TemporalConfig,
    /// Neighborhood radius used by fat picking.
    pub pick_radius: u32,
    pub gizmo: GizmoConfig,
    pub snap: SnapSettings,
    /// Draw mesh edges into the overlay stage.
    pub wireframe: bool,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            render_scale: 1.0,
            clear_color: Vec4::new(0.1, 0.1, 0.12, 1.0),
            post_effects: vec![PostEffectDesc::new(PostEffectKind::Tonemap {
                exposure: 1.0,
            })],
            outline: OutlineConfig::default(),
            temporal: TemporalConfig::default(),
            pick_radius: 3,
            gizmo: GizmoConfig::default(),
            snap: SnapSettings::default(),
            wireframe: false,
        }
    }
}

impl ViewportConfig {
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.render_scale.is_finite() && self.render_scale > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "render_scale must be positive, got {}",
                self.render_scale
            )));
        }
        if !(0.0..1.0).contains(&self.temporal.blend) {
            return Err(ConfigError::Invalid(format!(
                "temporal.blend must be in [0, 1), got {}",
                self.temporal.blend
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_is_default() {
        let config = ViewportConfig::from_yaml("{}").unwrap();
        assert_eq!(config, ViewportConfig::default());
    }

    #[test]
    fn parses_effect_chain() {
        let yaml = r#"
render_scale: 0.5
post_effects:
  - kind: tonemap
    exposure: 1.5
  - kind: vignette
    strength: 0.4
    radius: 0.8
    enabled: false
snap:
  enabled: true
  move_step: 0.25
"#;
        let config = ViewportConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.render_scale, 0.5);
        assert_eq!(config.post_effects.len(), 2);
        assert_eq!(config.post_effects[0].kind.name(), "tonemap");
        assert!(!config.post_effects[1].enabled);
        assert!(config.snap.enabled);
        assert_eq!(config.snap.move_step, 0.25);
        assert_eq!(config.snap.scale_step, SnapSettings::default().scale_step);
    }

    #[test]
    fn yaml_round_trip() {
        let config = ViewportConfig::default();
        let text = config.to_yaml().unwrap();
        assert_eq!(ViewportConfig::from_yaml(&text).unwrap(), config);
    }

    #[test]
    fn rejects_bad_scale() {
        assert!(matches!(
            ViewportConfig::from_yaml("render_scale: 0"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn load_from_file() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "pick_radius: 5\n").unwrap();
        assert_eq!(ViewportConfig::load(tmp.path()).unwrap().pick_radius, 5);
    }
}
