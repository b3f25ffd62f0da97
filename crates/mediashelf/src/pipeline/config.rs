use glob::Pattern;

use crate::config::{Config, PlacementConfig, ScanConfig};
use crate::error::ConfigError;

/// Settings the pipeline reads while running jobs. Extension lists are
/// lowercased and ignore patterns compiled once.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub video_extensions: Vec<String>,
    pub subtitle_extensions: Vec<String>,
    pub trash_markers: Vec<String>,
    pub ignore_patterns: Vec<Pattern>,
    pub retry_delays_ms: Vec<u64>,
    pub rename_enabled: bool,
    pub move_enabled: bool,
    pub allow_cross_cloud_moves: bool,
}

fn lowercase_all(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.trim_start_matches('.').to_lowercase())
        .collect()
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let ignore_patterns = config
            .scan
            .ignore_patterns
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| ConfigError::InvalidPattern {
                    pattern: p.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::build(&config.scan, &config.placement, ignore_patterns))
    }

    fn build(scan: &ScanConfig, placement: &PlacementConfig, ignore_patterns: Vec<Pattern>) -> Self {
        Self {
            video_extensions: lowercase_all(&scan.video_extensions),
            subtitle_extensions: lowercase_all(&scan.subtitle_extensions),
            trash_markers: scan.trash_markers.iter().map(|m| m.to_lowercase()).collect(),
            ignore_patterns,
            retry_delays_ms: placement.retry_delays_ms.clone(),
            rename_enabled: placement.rename_enabled,
            move_enabled: placement.move_enabled,
            allow_cross_cloud_moves: placement.allow_cross_cloud_moves,
        }
    }

    pub fn is_video_extension(&self, ext: &str) -> bool {
        let ext = ext.to_lowercase();
        self.video_extensions.iter().any(|v| *v == ext)
    }

    pub fn is_subtitle_extension(&self, ext: &str) -> bool {
        let ext = ext.to_lowercase();
        self.subtitle_extensions.iter().any(|v| *v == ext)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::build(&ScanConfig::default(), &PlacementConfig::default(), Vec::new())
    }
}
