use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use tracing::info;

use super::pipeline_config;
use crate::cli::MatchFieldsArgs;
use crate::config::PipelineConfig;
use crate::engine::{FormPositions, LayoutTree, field_rectangles};
use crate::layout::index_text_blocks;
use crate::matcher::LabelMatcher;
use crate::model::FlowElement;
use crate::overlap::resolve_overlaps;
use crate::util::write_json_pretty;

pub fn run(args: MatchFieldsArgs) -> Result<()> {
    let config = pipeline_config(&args.tuning)?;
    let positions: FormPositions = read_json(&args.positions)?;
    let layout: LayoutTree = read_json(&args.layout)?;

    let elements = match_and_merge(&positions, &layout, &args.id_seed, &config)?;

    match &args.output {
        Some(path) => {
            write_json_pretty(path, &elements)?;
            info!(path = %path.display(), elements = elements.len(), "wrote matched fields");
        }
        None => {
            let rendered =
                serde_json::to_string_pretty(&elements).context("failed to render fields")?;
            println!("{rendered}");
        }
    }

    Ok(())
}

pub(crate) fn match_and_merge(
    positions: &FormPositions,
    layout: &LayoutTree,
    id_seed: &str,
    config: &PipelineConfig,
) -> Result<Vec<FlowElement>> {
    let blocks = index_text_blocks(layout);
    let (fields, degenerate) = field_rectangles(positions);

    let matcher = LabelMatcher::new(config.match_options())?;
    let matched = matcher.match_fields(&fields, &blocks, id_seed);
    let matched_count = matched.len();
    let elements = resolve_overlaps(matched, config.overlap_threshold);

    info!(
        text_blocks = blocks.len(),
        fields = fields.len(),
        degenerate,
        merged = matched_count - elements.len(),
        elements = elements.len(),
        "matched field labels"
    );
    Ok(elements)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("failed to parse {}", path.display()))
}
