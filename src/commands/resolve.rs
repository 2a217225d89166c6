use std::fs;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use super::{ledger_path, pipeline_config};
use crate::cli::ResolveArgs;
use crate::model::ResolveRunManifest;
use crate::pipeline::{Sources, resolve_template};
use crate::sources::{CommandEngine, CommandOracle, PdftoppmRasterizer};
use crate::store::{open_ledger, record_run};
use crate::util::{now_utc_string, utc_compact_string, write_json_pretty};

const MANIFEST_VERSION: u32 = 1;

pub fn run(args: ResolveArgs) -> Result<()> {
    let config = pipeline_config(&args.tuning)?;
    let started_at = now_utc_string();

    let document = fs::read(&args.document)
        .with_context(|| format!("failed to read {}", args.document.display()))?;
    let prompt = match &args.prompt_file {
        Some(path) => Some(
            fs::read_to_string(path)
                .with_context(|| format!("failed to read prompt file {}", path.display()))?,
        ),
        None => args.prompt.clone(),
    };

    info!(
        document = %args.document.display(),
        bytes = document.len(),
        prompt = prompt.is_some(),
        batch_size = config.batch_size,
        relabel = config.relabel,
        "resolving template"
    );

    let rasterizer = PdftoppmRasterizer::new(args.pdftoppm_command.clone(), config.render_dpi)?;
    let engine = CommandEngine::initialize(args.engine_command.clone())?;
    let oracle = CommandOracle::new(args.oracle_command.clone());
    let sources = Sources {
        rasterizer: &rasterizer,
        fields: &engine,
        structure: &oracle,
        prompts: &oracle,
        vision: Some(&oracle),
    };

    let resolution = resolve_template(&document, prompt.as_deref(), &sources, &config);
    engine.teardown();
    let resolution =
        resolution.with_context(|| format!("failed to resolve {}", args.document.display()))?;

    let sha_prefix = resolution
        .document_sha256
        .get(..12)
        .unwrap_or(&resolution.document_sha256);
    let run_id = format!("run-{}-{}", utc_compact_string(Utc::now()), sha_prefix);
    let run_dir = args.cache_root.join("runs").join(&run_id);
    let result_path = run_dir.join("result.json");
    let manifest_path = run_dir.join("manifest.json");
    let db_path = ledger_path(&args.cache_root, args.db_path.as_deref());

    write_json_pretty(&result_path, &resolution.result)?;

    for warning in &resolution.warnings {
        warn!(run_id = %run_id, "{warning}");
    }

    let manifest = ResolveRunManifest {
        manifest_version: MANIFEST_VERSION,
        run_id: run_id.clone(),
        status: "completed".to_string(),
        started_at,
        updated_at: now_utc_string(),
        document_path: args.document.display().to_string(),
        document_sha256: resolution.document_sha256.clone(),
        result_path: result_path.display().to_string(),
        db_path: db_path.display().to_string(),
        completed_stages: resolution
            .stages
            .iter()
            .map(|stage| stage.to_string())
            .collect(),
        counts: resolution.counts.clone(),
        warnings: resolution.warnings.clone(),
    };
    write_json_pretty(&manifest_path, &manifest)?;

    let mut connection = open_ledger(&db_path)?;
    record_run(&mut connection, &manifest, &resolution.result)?;

    info!(
        run_id = %run_id,
        template = %resolution.result.template_name,
        signers = resolution.counts.signer_count,
        elements = resolution.counts.flow_element_count,
        merged = resolution.counts.merged_field_count,
        relabeled = resolution.counts.relabeled_field_count,
        result = %result_path.display(),
        manifest = %manifest_path.display(),
        "resolve completed"
    );

    Ok(())
}
