pub mod match_fields;
pub mod resolve;
pub mod status;

#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::cli::TuningArgs;
use crate::config::PipelineConfig;

pub(crate) const DEFAULT_DB_FILE: &str = "formflow.sqlite";

pub(crate) fn ledger_path(cache_root: &Path, db_path: Option<&Path>) -> PathBuf {
    db_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| cache_root.join(DEFAULT_DB_FILE))
}

pub(crate) fn pipeline_config(tuning: &TuningArgs) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::load(tuning.config.as_deref())?;

    if let Some(value) = tuning.batch_size {
        config.batch_size = value;
    }
    if let Some(value) = tuning.overlap_threshold {
        config.overlap_threshold = value;
    }
    if let Some(value) = tuning.vertical_overlap_ratio {
        config.vertical_overlap_ratio = value;
    }
    if let Some(value) = tuning.right_side_tolerance {
        config.right_side_tolerance = value;
    }
    if let Some(value) = tuning.render_dpi {
        config.render_dpi = value;
    }
    if let Some(value) = &tuning.language {
        config.language_hint = value.clone();
    }
    if tuning.skip_relabel {
        config.relabel = false;
    }

    config.validate().context("invalid pipeline configuration")?;
    Ok(config)
}
