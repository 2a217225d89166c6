use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::markers::point_to_pixel_scale;
use crate::matcher::MatchOptions;
use crate::overlap::DEFAULT_OVERLAP_THRESHOLD;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub overlap_threshold: f64,
    pub vertical_overlap_ratio: f64,
    pub right_side_tolerance: f64,
    pub render_dpi: u32,
    pub language_hint: String,
    pub relabel: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let matching = MatchOptions::default();
        Self {
            batch_size: 5,
            overlap_threshold: DEFAULT_OVERLAP_THRESHOLD,
            vertical_overlap_ratio: matching.vertical_overlap_ratio,
            right_side_tolerance: matching.right_side_tolerance,
            render_dpi: 96,
            language_hint: "eng".to_string(),
            relabel: true,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.overlap_threshold) {
            bail!(
                "overlap_threshold must be within [0, 1], got {}",
                self.overlap_threshold
            );
        }
        if !(0.0..=1.0).contains(&self.vertical_overlap_ratio) {
            bail!(
                "vertical_overlap_ratio must be within [0, 1], got {}",
                self.vertical_overlap_ratio
            );
        }
        if self.right_side_tolerance < 0.0 {
            bail!("right_side_tolerance must not be negative");
        }
        if self.render_dpi == 0 {
            bail!("render_dpi must be positive");
        }
        if self.language_hint.trim().is_empty() {
            bail!("language_hint must not be blank");
        }

        Ok(())
    }

    // Markers are drawn on the rasterized pages, so they share the rasterizer's resolution.
    pub fn point_to_pixel_scale(&self) -> f64 {
        point_to_pixel_scale(self.render_dpi)
    }

    pub fn match_options(&self) -> MatchOptions {
        MatchOptions {
            vertical_overlap_ratio: self.vertical_overlap_ratio,
            right_side_tolerance: self.right_side_tolerance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::scratch_path;

    #[test]
    fn defaults_match_engine_constants() {
        let config = PipelineConfig::default();

        assert_eq!(config.batch_size, 5);
        assert_eq!(config.overlap_threshold, 0.2);
        assert_eq!(config.vertical_overlap_ratio, 0.30);
        assert_eq!(config.right_side_tolerance, 3.0);
        assert!((config.point_to_pixel_scale() - 1.3333).abs() < 1e-3);
        assert_eq!(config.language_hint, "eng");
        assert!(config.relabel);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_config_file_keeps_remaining_defaults() {
        let path = scratch_path("config").with_extension("json");
        fs::write(&path, r#"{"batch_size": 2, "relabel": false}"#).expect("write config");

        let loaded = PipelineConfig::load(Some(&path));
        let _ = fs::remove_file(&path);
        let config = loaded.expect("load");

        assert_eq!(config.batch_size, 2);
        assert!(!config.relabel);
        assert_eq!(config.language_hint, "eng");
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let mut config = PipelineConfig::default();
        config.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.overlap_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.language_hint = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn marker_scale_follows_render_dpi() {
        let config = PipelineConfig {
            render_dpi: 150,
            ..PipelineConfig::default()
        };

        assert!(config.validate().is_ok());
        assert!((config.point_to_pixel_scale() - 150.0 / 72.0).abs() < 1e-9);
    }
}
