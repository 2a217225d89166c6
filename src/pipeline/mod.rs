use std::collections::{BTreeSet, HashMap};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::engine::{FormPositions, LayoutTree, field_rectangles};
use crate::error::{ResolveError, Stage};
use crate::fusion::{
    BatchResult, FusedStructure, StructureBatch, build_signer_profiles, fuse_signer_fields,
    fuse_structure,
};
use crate::layout::index_text_blocks;
use crate::markers::{annotate_pages, marker_index, plan_markers, relabel_prompt};
use crate::matcher::LabelMatcher;
use crate::model::{
    FlowElement, ParticipantKey, ParticipantKeyType, PromptInfo, ResolveCounts, SignerProfile,
    TemplateResolutionResult,
};
use crate::overlap::resolve_overlaps;
use crate::signers::{apply_relabels, assign_signers, resolve_signers};
use crate::sources::{
    DocumentRasterizer, DocumentStructureSource, FieldPositionSource, PageImage,
    PromptInterpreter, StructureOptions, VisionOracle,
};
use crate::util::sha256_bytes;

#[cfg(test)]
mod tests;

pub const UNTITLED_TEMPLATE: &str = "Untitled template";

pub struct Sources<'a> {
    pub rasterizer: &'a dyn DocumentRasterizer,
    pub fields: &'a dyn FieldPositionSource,
    pub structure: &'a dyn DocumentStructureSource,
    pub prompts: &'a dyn PromptInterpreter,
    pub vision: Option<&'a dyn VisionOracle>,
}

#[derive(Debug, Clone)]
pub struct ResolutionRun {
    pub result: TemplateResolutionResult,
    pub document_sha256: String,
    pub stages: Vec<Stage>,
    pub counts: ResolveCounts,
    pub warnings: Vec<String>,
}

struct StageTracker {
    current: Option<Stage>,
    completed: Vec<Stage>,
}

impl StageTracker {
    fn new() -> Self {
        Self {
            current: None,
            completed: Vec::new(),
        }
    }

    fn enter(&mut self, next: Stage) -> Result<(), ResolveError> {
        if let Some(current) = self.current {
            if next <= current {
                return Err(ResolveError::Invariant(format!(
                    "stage {next} cannot follow {current}"
                )));
            }
            self.completed.push(current);
        }

        info!(stage = %next, "entering stage");
        self.current = Some(next);
        Ok(())
    }

    fn finish(mut self) -> Vec<Stage> {
        if let Some(current) = self.current.take() {
            self.completed.push(current);
        }
        self.completed
    }
}

struct Extraction {
    prompt: Option<PromptInfo>,
    pages: Vec<PageImage>,
    structure_batches: Vec<BatchResult<StructureBatch>>,
}

pub fn resolve_template(
    document: &[u8],
    prompt: Option<&str>,
    sources: &Sources<'_>,
    config: &PipelineConfig,
) -> Result<ResolutionRun, ResolveError> {
    check_document(document)?;

    let document_sha256 = sha256_bytes(document);
    let mut stages = StageTracker::new();
    let mut warnings = Vec::new();

    stages.enter(Stage::Extracting)?;
    let Extraction {
        prompt,
        pages,
        structure_batches,
    } = extract(document, prompt, sources, config)?;
    let page_numbers = pages
        .iter()
        .map(|page| page.page_number)
        .collect::<BTreeSet<u32>>();

    stages.enter(Stage::Fusing)?;
    let structure_batch_count = structure_batches.len();
    let structure = fuse_structure(structure_batches);
    let language_hint = structure
        .languages
        .clone()
        .unwrap_or_else(|| config.language_hint.clone());

    let (extracted_signers, engine_output) = rayon::join(
        || extract_signer_profiles(&structure, &pages, sources.structure, config),
        || extract_engine_output(document, &language_hint, sources.fields),
    );
    let extracted_signers = extracted_signers?;
    let (positions, layout) = engine_output?;

    let blocks = index_text_blocks(&layout);
    let (mut field_rects, degenerate_field_count) = field_rectangles(&positions);

    let before_guard = field_rects.len();
    field_rects.retain(|field| page_numbers.contains(&field.page_number));
    let out_of_range_field_count = before_guard - field_rects.len();
    if out_of_range_field_count > 0 {
        let message = format!(
            "dropped {out_of_range_field_count} field(s) on pages outside the rendered range 1..={}",
            pages.len()
        );
        warn!(count = out_of_range_field_count, "{message}");
        warnings.push(message);
    }

    let matcher = LabelMatcher::new(config.match_options())
        .map_err(|error| ResolveError::source("label matcher", &error))?;
    let matched = matcher.match_fields(&field_rects, &blocks, &document_sha256);
    let matched_label_count = matched
        .iter()
        .filter(|element| element.label.is_some())
        .count();
    info!(
        text_blocks = blocks.len(),
        fields = matched.len(),
        labeled = matched_label_count,
        signers = extracted_signers.len(),
        "fused extraction results"
    );

    stages.enter(Stage::Deduplicating)?;
    let before_merge = matched.len();
    let elements = resolve_overlaps(matched, config.overlap_threshold);
    let merged_field_count = before_merge - elements.len();
    debug!(merged = merged_field_count, remaining = elements.len(), "resolved overlaps");

    stages.enter(Stage::Relabeling)?;
    let (elements, extracted_signers, relabeled_field_count) = relabel(
        elements,
        extracted_signers,
        &pages,
        sources.vision,
        config,
        &mut warnings,
    );

    stages.enter(Stage::AssigningSigners)?;
    let prompt_signers = prompt.as_ref().map(|info| info.signers.as_slice());
    let signers = resolve_signers(prompt_signers, &extracted_signers);
    let (signers, flow_elements) = assign_signers(signers, elements);

    stages.enter(Stage::Finalized)?;
    let result = finalize(
        prompt.as_ref(),
        &structure,
        &language_hint,
        pages.len(),
        signers,
        flow_elements,
    );
    check_result(&result, &page_numbers)?;

    let counts = ResolveCounts {
        page_count: result.page_count,
        structure_batch_count,
        text_block_count: blocks.len(),
        field_rectangle_count: before_guard,
        degenerate_field_count,
        out_of_range_field_count,
        matched_label_count,
        merged_field_count,
        relabeled_field_count,
        signer_count: result.signers.len(),
        flow_element_count: result.flow_elements.len(),
    };
    info!(
        template = %result.template_name,
        signers = counts.signer_count,
        elements = counts.flow_element_count,
        warnings = warnings.len(),
        "template resolved"
    );

    Ok(ResolutionRun {
        result,
        document_sha256,
        stages: stages.finish(),
        counts,
        warnings,
    })
}

fn check_document(document: &[u8]) -> Result<(), ResolveError> {
    if document.is_empty() {
        return Err(ResolveError::Input("document is empty".to_string()));
    }

    // The header may be preceded by up to 1024 bytes of junk.
    let head = &document[..document.len().min(1024 + 5)];
    if !head.windows(5).any(|window| window == b"%PDF-") {
        return Err(ResolveError::Input(
            "document does not contain a PDF header".to_string(),
        ));
    }

    Ok(())
}

fn extract(
    document: &[u8],
    prompt: Option<&str>,
    sources: &Sources<'_>,
    config: &PipelineConfig,
) -> Result<Extraction, ResolveError> {
    let prompt = match prompt.map(str::trim).filter(|value| !value.is_empty()) {
        Some(text) => {
            let info = sources
                .prompts
                .interpret(text)
                .map_err(|error| ResolveError::oracle(Stage::Extracting, &error))?;
            info!(signers = info.signers.len(), "interpreted prompt");
            Some(info)
        }
        None => None,
    };

    let pages = sources
        .rasterizer
        .to_images(document)
        .map_err(|error| ResolveError::source("rasterizer", &error))?;
    if pages.is_empty() {
        return Err(ResolveError::Input(
            "document has no pages after rasterization".to_string(),
        ));
    }
    info!(pages = pages.len(), "rasterized document");

    let batches = pages.chunks(config.batch_size.max(1)).collect::<Vec<_>>();
    let structure_batches = batches
        .par_iter()
        .enumerate()
        .map(|(batch_index, batch)| {
            let options = batch_options(batch_index, batch, config);
            sources
                .structure
                .extract_structure(batch, &options)
                .map(|value| BatchResult::new(batch_index, value))
                .map_err(|error| ResolveError::oracle(Stage::Extracting, &error))
        })
        .collect::<Result<Vec<_>, _>>()?;
    debug!(batches = structure_batches.len(), "extracted document structure");

    Ok(Extraction {
        prompt,
        pages,
        structure_batches,
    })
}

fn batch_options(batch_index: usize, batch: &[PageImage], config: &PipelineConfig) -> StructureOptions {
    StructureOptions {
        batch_index,
        first_page: batch.first().map(|page| page.page_number).unwrap_or(1),
        language_hint: config.language_hint.clone(),
    }
}

fn extract_signer_profiles(
    structure: &FusedStructure,
    pages: &[PageImage],
    source: &dyn DocumentStructureSource,
    config: &PipelineConfig,
) -> Result<Vec<SignerProfile>, ResolveError> {
    let titles = structure
        .signers
        .iter()
        .map(|header| header.title.as_str())
        .collect::<BTreeSet<&str>>();
    let batches = pages.chunks(config.batch_size.max(1)).collect::<Vec<_>>();

    let calls = titles
        .iter()
        .flat_map(|title| (0..batches.len()).map(move |batch_index| (*title, batch_index)))
        .collect::<Vec<(&str, usize)>>();

    let answers = calls
        .par_iter()
        .map(|(title, batch_index)| {
            let batch = batches[*batch_index];
            let options = batch_options(*batch_index, batch, config);
            source
                .extract_signer_fields(batch, title, &options)
                .map(|fields| (*title, BatchResult::new(*batch_index, fields)))
                .map_err(|error| ResolveError::oracle(Stage::Fusing, &error))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut by_title = HashMap::<&str, Vec<BatchResult<Vec<String>>>>::new();
    for (title, answer) in answers {
        by_title.entry(title).or_default().push(answer);
    }
    let fields_by_title = by_title
        .into_iter()
        .map(|(title, answers)| (title, fuse_signer_fields(answers)))
        .collect::<HashMap<&str, Vec<String>>>();

    Ok(build_signer_profiles(&structure.signers, |title| {
        fields_by_title.get(title).cloned().unwrap_or_default()
    }))
}

fn extract_engine_output(
    document: &[u8],
    language_hint: &str,
    source: &dyn FieldPositionSource,
) -> Result<(FormPositions, LayoutTree), ResolveError> {
    let (positions, layout) = rayon::join(
        || source.extract_fields(document, language_hint),
        || source.extract_layout(document, language_hint),
    );
    let positions =
        positions.map_err(|error| ResolveError::source("field position source", &error))?;
    let layout = layout.map_err(|error| ResolveError::source("layout engine", &error))?;
    Ok((positions, layout))
}

// Every failure in here is recoverable.
fn relabel(
    elements: Vec<FlowElement>,
    signers: Vec<SignerProfile>,
    pages: &[PageImage],
    vision: Option<&dyn VisionOracle>,
    config: &PipelineConfig,
    warnings: &mut Vec<String>,
) -> (Vec<FlowElement>, Vec<SignerProfile>, usize) {
    let Some(vision) = vision.filter(|_| config.relabel) else {
        debug!("relabeling disabled");
        return (elements, signers, 0);
    };
    if elements.is_empty() {
        debug!("no fields to relabel");
        return (elements, signers, 0);
    }

    let markers = plan_markers(&elements, config.point_to_pixel_scale());
    let annotated = match annotate_pages(pages, &markers) {
        Ok(value) => value,
        Err(error) => {
            let message = format!("skipped relabeling, could not draw field markers: {error:#}");
            warn!("{message}");
            warnings.push(message);
            return (elements, signers, 0);
        }
    };

    let titles = signers
        .iter()
        .map(|signer| signer.title.clone())
        .collect::<Vec<String>>();
    let predictions = match vision.annotate(&annotated, &relabel_prompt(&titles)) {
        Ok(value) => value,
        Err(error) => {
            let message = format!("skipped relabeling, vision oracle failed: {error:#}");
            warn!("{message}");
            warnings.push(message);
            return (elements, signers, 0);
        }
    };

    let (elements, signers, relabeled) =
        apply_relabels(elements, signers, &marker_index(&markers), &predictions);
    info!(
        markers = markers.len(),
        predictions = predictions.len(),
        relabeled,
        "applied vision labels"
    );
    (elements, signers, relabeled)
}

fn finalize(
    prompt: Option<&PromptInfo>,
    structure: &FusedStructure,
    language_hint: &str,
    page_count: usize,
    signers: Vec<SignerProfile>,
    flow_elements: Vec<FlowElement>,
) -> TemplateResolutionResult {
    let template_name = prompt
        .and_then(|info| non_blank(info.name.as_deref()))
        .or_else(|| non_blank(structure.template_name.as_deref()))
        .unwrap_or(UNTITLED_TEMPLATE)
        .to_string();

    let send_method_type = prompt
        .and_then(|info| info.send_method_type)
        .or(structure.send_method_type)
        .unwrap_or_default();

    let sender_key = prompt
        .and_then(|info| non_blank(info.sender_email.as_deref()))
        .map(|email| ParticipantKey {
            key_type: ParticipantKeyType::UserEmail,
            key: email.to_string(),
        });

    TemplateResolutionResult {
        template_name,
        send_method_type,
        languages: language_hint.to_string(),
        sender_key,
        page_count,
        signers,
        flow_elements,
    }
}

fn check_result(
    result: &TemplateResolutionResult,
    page_numbers: &BTreeSet<u32>,
) -> Result<(), ResolveError> {
    if result.signers.is_empty() {
        return Err(ResolveError::Invariant("no signers in result".to_string()));
    }

    for element in &result.flow_elements {
        if !page_numbers.contains(&element.page_number) {
            return Err(ResolveError::Invariant(format!(
                "element {} references page {} outside the rendered pages",
                element.element_id, element.page_number
            )));
        }
        if element.signer_index >= result.signers.len() {
            return Err(ResolveError::Invariant(format!(
                "element {} references signer {} of {}",
                element.element_id,
                element.signer_index,
                result.signers.len()
            )));
        }
    }

    Ok(())
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
