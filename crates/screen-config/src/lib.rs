use std::time::Duration;

use anyhow::{Result, ensure};
use serde::{Deserialize, Deserializer};

pub use orientation::{Brightness, FlipState};
pub use surface::{ResampleFilter, SurfaceSize};

mod orientation {
    use super::*;

    /// Coordinate-convention correction applied while compositing.
    ///
    /// `mirror_horizontal` mirrors the drawing about the vertical midline,
    /// `flip_vertical` mirrors it about the horizontal midline. The two axes
    /// are independent and compose.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
    #[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
    pub struct FlipState {
        pub mirror_horizontal: bool,
        pub flip_vertical: bool,
    }

    impl FlipState {
        pub const NONE: Self = Self {
            mirror_horizontal: false,
            flip_vertical: false,
        };

        pub const fn new(mirror_horizontal: bool, flip_vertical: bool) -> Self {
            Self {
                mirror_horizontal,
                flip_vertical,
            }
        }

        pub const fn is_identity(&self) -> bool {
            !self.mirror_horizontal && !self.flip_vertical
        }

        pub const fn toggled_mirror(self) -> Self {
            Self {
                mirror_horizontal: !self.mirror_horizontal,
                ..self
            }
        }

        pub const fn toggled_flip(self) -> Self {
            Self {
                flip_vertical: !self.flip_vertical,
                ..self
            }
        }
    }

    /// Binary self-lit toggle for the screen material.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
    #[serde(rename_all = "kebab-case")]
    pub enum Brightness {
        /// Emissive slot mirrors the base color at full intensity.
        #[default]
        Lit,
        /// Emissive slot cleared, emissive factor zero.
        Unlit,
    }

    impl Brightness {
        pub const fn is_lit(self) -> bool {
            matches!(self, Self::Lit)
        }
    }
}

mod surface {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
    pub struct SurfaceSize {
        pub width: u32,
        pub height: u32,
    }

    impl SurfaceSize {
        /// Largest edge accepted for the working surface.
        pub const MAX_EDGE: u32 = 16_384;

        pub const fn new(width: u32, height: u32) -> Self {
            Self { width, height }
        }

        pub fn validate(&self) -> Result<()> {
            ensure!(
                self.width > 0 && self.height > 0,
                "surface dimensions must be positive (got {}x{})",
                self.width,
                self.height
            );
            ensure!(
                self.width <= Self::MAX_EDGE && self.height <= Self::MAX_EDGE,
                "surface dimensions must not exceed {} (got {}x{})",
                Self::MAX_EDGE,
                self.width,
                self.height
            );
            Ok(())
        }
    }

    impl Default for SurfaceSize {
        fn default() -> Self {
            // tall phone aspect
            Self::new(2048, 4096)
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
    #[serde(rename_all = "kebab-case")]
    pub enum ResampleFilter {
        Nearest,
        Bilinear,
        #[default]
        CatmullRom,
        Lanczos3,
    }
}

/// How the composited surface is handed to the texture backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CreationStrategy {
    /// Upload the surface's RGBA8 pixels directly.
    RawPixels,
    /// Encode the surface to PNG and let the backend decode it.
    EncodedPng,
}

impl CreationStrategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RawPixels => "raw-pixels",
            Self::EncodedPng => "encoded-png",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct ScreenConfig {
    /// Name of the material that receives the composited texture.
    pub material_name: String,
    /// Working surface dimensions; should match the material's UV aspect.
    pub surface: SurfaceSize,
    /// Flip correction used when a caller does not supply one. Axes left out
    /// of the document keep their default of `true`.
    #[serde(deserialize_with = "deserialize_correction")]
    pub orientation_correction: FlipState,
    /// Brightness used when a caller does not supply one.
    pub brightness: Brightness,
    /// Texture creation strategies, tried in order.
    pub texture_strategies: Vec<CreationStrategy>,
    /// Upper bound on the single wait for the render host to become ready.
    #[serde(with = "humantime_serde")]
    pub host_ready_timeout: Duration,
    /// Filter used when scaling the source onto the working surface.
    pub resample_filter: ResampleFilter,
}

const fn correction_enabled() -> bool {
    true
}

fn deserialize_correction<'de, D>(deserializer: D) -> std::result::Result<FlipState, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(rename_all = "kebab-case", deny_unknown_fields)]
    struct Correction {
        #[serde(default = "correction_enabled")]
        mirror_horizontal: bool,
        #[serde(default = "correction_enabled")]
        flip_vertical: bool,
    }

    let correction = Correction::deserialize(deserializer)?;
    Ok(FlipState::new(
        correction.mirror_horizontal,
        correction.flip_vertical,
    ))
}

impl ScreenConfig {
    pub const DEFAULT_MATERIAL_NAME: &'static str = "Screen";

    fn default_strategies() -> Vec<CreationStrategy> {
        vec![CreationStrategy::RawPixels, CreationStrategy::EncodedPng]
    }

    const fn default_host_ready_timeout() -> Duration {
        Duration::from_secs(2)
    }

    /// Validate invariants serde defaults cannot express.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            !self.material_name.trim().is_empty(),
            "material-name must not be blank"
        );
        self.surface.validate()?;
        ensure!(
            !self.texture_strategies.is_empty(),
            "texture-strategies must list at least one strategy"
        );
        for (idx, strategy) in self.texture_strategies.iter().enumerate() {
            ensure!(
                !self.texture_strategies[..idx].contains(strategy),
                "texture-strategies lists {} more than once",
                strategy.as_str()
            );
        }
        Ok(self)
    }
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            material_name: Self::DEFAULT_MATERIAL_NAME.to_string(),
            surface: SurfaceSize::default(),
            orientation_correction: FlipState::new(true, true),
            brightness: Brightness::Lit,
            texture_strategies: Self::default_strategies(),
            host_ready_timeout: Self::default_host_ready_timeout(),
            resample_filter: ResampleFilter::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg: ScreenConfig = serde_yaml::from_str("{}").expect("valid yaml");
        let cfg = cfg.validated().expect("defaults are valid");
        assert_eq!(cfg.material_name, "Screen");
        assert_eq!(cfg.surface, SurfaceSize::new(2048, 4096));
        assert_eq!(cfg.orientation_correction, FlipState::new(true, true));
        assert_eq!(cfg.brightness, Brightness::Lit);
        assert_eq!(
            cfg.texture_strategies,
            vec![CreationStrategy::RawPixels, CreationStrategy::EncodedPng]
        );
        assert_eq!(cfg.host_ready_timeout, Duration::from_secs(2));
        assert_eq!(cfg.resample_filter, ResampleFilter::CatmullRom);
    }

    #[test]
    fn parses_kebab_case_fields() {
        let cfg: ScreenConfig = serde_yaml::from_str(
            r#"
material-name: Display
surface:
  width: 1179
  height: 2556
orientation-correction:
  mirror-horizontal: false
brightness: unlit
texture-strategies: [encoded-png]
host-ready-timeout: 250ms
resample-filter: lanczos3
"#,
        )
        .expect("valid yaml");
        assert_eq!(cfg.material_name, "Display");
        assert_eq!(cfg.surface, SurfaceSize::new(1179, 2556));
        assert_eq!(cfg.orientation_correction, FlipState::new(false, true));
        assert_eq!(cfg.brightness, Brightness::Unlit);
        assert_eq!(cfg.texture_strategies, vec![CreationStrategy::EncodedPng]);
        assert_eq!(cfg.host_ready_timeout, Duration::from_millis(250));
        assert_eq!(cfg.resample_filter, ResampleFilter::Lanczos3);
    }

    #[test]
    fn partial_orientation_keeps_default_for_missing_axis() {
        let cfg: ScreenConfig =
            serde_yaml::from_str("orientation-correction:\n  mirror-horizontal: true\n")
                .expect("valid yaml");
        assert_eq!(
            cfg.orientation_correction,
            ScreenConfig::default().orientation_correction
        );

        let cfg: ScreenConfig =
            serde_yaml::from_str("orientation-correction: {}").expect("valid yaml");
        assert_eq!(cfg.orientation_correction, FlipState::new(true, true));

        let err = serde_yaml::from_str::<ScreenConfig>("orientation-correction: { mirror: true }")
            .unwrap_err();
        assert!(err.to_string().contains("unknown field"));
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = serde_yaml::from_str::<ScreenConfig>("material: Screen").unwrap_err();
        assert!(err.to_string().contains("unknown field"));
    }

    #[test]
    fn rejects_duplicate_strategies() {
        let cfg = ScreenConfig {
            texture_strategies: vec![CreationStrategy::RawPixels, CreationStrategy::RawPixels],
            ..ScreenConfig::default()
        };
        let err = cfg.validated().unwrap_err();
        assert!(err.to_string().contains("raw-pixels"));
    }

    #[test]
    fn rejects_empty_strategy_list_and_zero_surface() {
        let cfg = ScreenConfig {
            texture_strategies: Vec::new(),
            ..ScreenConfig::default()
        };
        assert!(cfg.validated().is_err());

        let cfg = ScreenConfig {
            surface: SurfaceSize::new(0, 4096),
            ..ScreenConfig::default()
        };
        assert!(cfg.validated().is_err());
    }

    #[test]
    fn flip_toggles_are_independent() {
        let flip = FlipState::NONE.toggled_mirror();
        assert_eq!(flip, FlipState::new(true, false));
        assert_eq!(flip.toggled_flip(), FlipState::new(true, true));
        assert!(flip.toggled_mirror().is_identity());
    }
}
