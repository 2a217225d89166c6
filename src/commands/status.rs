use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::{info, warn};

use super::ledger_path;
use crate::cli::StatusArgs;
use crate::store::ledger_summary;

pub fn run(args: StatusArgs) -> Result<()> {
    let db_path = ledger_path(&args.cache_root, args.db_path.as_deref());

    info!(cache_root = %args.cache_root.display(), "status requested");

    if !db_path.exists() {
        warn!(path = %db_path.display(), "ledger database missing");
        return Ok(());
    }

    let connection = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    let summary = ledger_summary(&connection)?;

    info!(
        path = %db_path.display(),
        runs = summary.run_count,
        signers = summary.signer_count,
        flow_elements = summary.flow_element_count,
        "ledger status"
    );

    match summary.latest {
        Some(latest) => info!(
            run_id = %latest.run_id,
            template = %latest.template_name,
            document = %latest.document_path,
            finished_at = %latest.finished_at,
            flow_elements = latest.flow_element_count,
            "latest run"
        ),
        None => warn!("no runs recorded yet"),
    }

    Ok(())
}
