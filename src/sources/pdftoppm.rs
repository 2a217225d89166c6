use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use regex::Regex;
use tracing::debug;

use super::{DocumentRasterizer, PageImage};
use crate::util::{ensure_directory, scratch_path};

pub struct PdftoppmRasterizer {
    program: String,
    dpi: u32,
    page_file: Regex,
}

impl PdftoppmRasterizer {
    pub fn new(program: impl Into<String>, dpi: u32) -> Result<Self> {
        let page_file =
            Regex::new(r"^page-(\d+)\.png$").context("failed to compile page file regex")?;
        Ok(Self {
            program: program.into(),
            dpi,
            page_file,
        })
    }

    fn render(&self, work_dir: &Path, document: &[u8]) -> Result<Vec<PageImage>> {
        let pdf_path = work_dir.join("document.pdf");
        fs::write(&pdf_path, document)
            .with_context(|| format!("failed to write {}", pdf_path.display()))?;

        let output = Command::new(&self.program)
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg("-png")
            .arg(&pdf_path)
            .arg(work_dir.join("page"))
            .output()
            .with_context(|| format!("failed to execute {}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{} returned non-zero exit status for {}: {}",
                self.program,
                pdf_path.display(),
                stderr.trim()
            );
        }

        let mut pages = Vec::new();
        for entry in fs::read_dir(work_dir)
            .with_context(|| format!("failed to list {}", work_dir.display()))?
        {
            let path = entry?.path();
            let Some(file_name) = path.file_name().and_then(|value| value.to_str()) else {
                continue;
            };
            let Some(page_number) = self.page_number_of(file_name) else {
                continue;
            };

            let png = fs::read(&path)
                .with_context(|| format!("failed to read page image {}", path.display()))?;
            pages.push(PageImage {
                page_number,
                png: Arc::from(png),
            });
        }

        pages.sort_by_key(|page| page.page_number);
        Ok(pages)
    }

    pub(crate) fn page_number_of(&self, file_name: &str) -> Option<u32> {
        let captures = self.page_file.captures(file_name)?;
        captures[1].parse::<u32>().ok().filter(|number| *number > 0)
    }
}

impl DocumentRasterizer for PdftoppmRasterizer {
    fn to_images(&self, document: &[u8]) -> Result<Vec<PageImage>> {
        let work_dir = scratch_path("raster");
        ensure_directory(&work_dir)?;

        let rendered = self.render(&work_dir, document);
        let _ = fs::remove_dir_all(&work_dir);

        let pages = rendered?;
        debug!(pages = pages.len(), dpi = self.dpi, "rasterized document");
        Ok(pages)
    }
}
