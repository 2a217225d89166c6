use std::collections::HashMap;
use std::process::Command;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

fn registry() -> MutexGuard<'static, HashMap<String, String>> {
    static ENGINES: OnceLock<Mutex<HashMap<String, String>>> = OnceLock::new();
    ENGINES
        .get_or_init(Mutex::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

pub fn initialize(program: &str) -> Result<String> {
    if let Some(version) = registry().get(program) {
        debug!(program, version = %version, "engine already initialized");
        return Ok(version.clone());
    }

    let version = probe_version(program)?;
    let mut engines = registry();
    let version = engines
        .entry(program.to_string())
        .or_insert(version)
        .clone();
    info!(program, version = %version, "engine initialized");
    Ok(version)
}

pub fn teardown(program: &str) -> bool {
    let removed = registry().remove(program).is_some();
    if removed {
        debug!(program, "engine torn down");
    }
    removed
}

fn probe_version(program: &str) -> Result<String> {
    let output = Command::new(program)
        .arg("--version")
        .output()
        .with_context(|| format!("failed to run {program} --version"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("{program} --version failed: {}", stderr.trim());
    }

    Ok(version_line(
        &String::from_utf8_lossy(&output.stdout),
        &String::from_utf8_lossy(&output.stderr),
    ))
}

pub(crate) fn version_line(stdout: &str, stderr: &str) -> String {
    let source = if stdout.trim().is_empty() {
        stderr.trim()
    } else {
        stdout.trim()
    };

    source
        .lines()
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .unwrap_or("unknown")
        .to_string()
}
