use std::io::Cursor;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, anyhow};
use image::{ImageFormat, Rgba, RgbaImage};

use super::*;
use crate::fusion::SignerHeader;
use crate::geometry::Rect;
use crate::model::{
    ElementType, FieldPrediction, FixedSigner, PromptSigner, SendMethodType, SignerType,
};

const DOCUMENT: &[u8] = b"%PDF-1.7\n% test document";

const POSITIONS: &str = r#"{
    "pages": [
        {
            "properties": { "pageNumber": 1 },
            "formElements": [
                { "type": "formTextField", "rect": [65, 8, 200, 22] },
                { "type": "formTextField", "rect": [10, 40, 100, 60] },
                { "type": "formTextField", "rect": [50, 40, 140, 60] }
            ]
        },
        {
            "properties": { "pageNumber": 2 },
            "formElements": [
                { "type": "formCheckBox", "rect": [10, 10, 20, 20] }
            ]
        },
        {
            "properties": { "pageNumber": 3 },
            "formElements": [
                { "type": "formTextField", "rect": [10, 10, 50, 20] }
            ]
        }
    ]
}"#;

const LAYOUT: &str = r#"{
    "pages": [
        {
            "properties": { "pageNumber": 1 },
            "elements": [
                { "type": "paragraph", "contents": [ { "rect": [10, 10, 60, 20], "text": "Name:" } ] },
                {
                    "type": "table",
                    "table": { "trs": [ { "tds": [ { "contents": [ { "rect": [150, 42, 200, 58], "text": "Amount" } ] } ] } ] }
                }
            ]
        },
        {
            "properties": { "pageNumber": 2 },
            "elements": [
                { "contents": [ { "rect": [25, 10, 80, 20], "text": "I agree" } ] }
            ]
        }
    ]
}"#;

fn blank_png() -> Vec<u8> {
    let image = RgbaImage::from_pixel(300, 300, Rgba([255, 255, 255, 255]));
    let mut encoded = Cursor::new(Vec::new());
    image
        .write_to(&mut encoded, ImageFormat::Png)
        .expect("encode");
    encoded.into_inner()
}

struct FakeRasterizer {
    pages: u32,
}

impl DocumentRasterizer for FakeRasterizer {
    fn to_images(&self, _document: &[u8]) -> Result<Vec<PageImage>> {
        let png: Arc<[u8]> = Arc::from(blank_png());
        Ok((1..=self.pages)
            .map(|page_number| PageImage {
                page_number,
                png: png.clone(),
            })
            .collect())
    }
}

struct FakeEngine {
    positions: &'static str,
    layout: &'static str,
    fail: bool,
    languages_seen: Mutex<Vec<String>>,
}

impl FakeEngine {
    fn new() -> Self {
        Self {
            positions: POSITIONS,
            layout: LAYOUT,
            fail: false,
            languages_seen: Mutex::new(Vec::new()),
        }
    }
}

impl FieldPositionSource for FakeEngine {
    fn extract_fields(&self, _document: &[u8], language_hint: &str) -> Result<FormPositions> {
        if self.fail {
            return Err(anyhow!("engine crashed"));
        }
        self.languages_seen
            .lock()
            .expect("lock")
            .push(language_hint.to_string());
        Ok(serde_json::from_str(self.positions)?)
    }

    fn extract_layout(&self, _document: &[u8], _language_hint: &str) -> Result<LayoutTree> {
        Ok(serde_json::from_str(self.layout)?)
    }
}

struct FakeStructure {
    batches: Vec<StructureBatch>,
    fields: HashMap<(String, usize), Vec<String>>,
    fail: bool,
    field_calls: AtomicUsize,
}

impl FakeStructure {
    fn two_signers() -> Self {
        let batches = vec![
            StructureBatch {
                template_name: Some("Purchase order".to_string()),
                send_method_type: None,
                languages: None,
                signers: vec![header("Customer", SignerType::Changeable)],
            },
            StructureBatch {
                template_name: Some("Ignored".to_string()),
                send_method_type: Some(SendMethodType::Parallel),
                languages: Some("heb".to_string()),
                signers: vec![
                    header("Customer", SignerType::Changeable),
                    header("CFO", SignerType::Static),
                ],
            },
        ];
        let fields = HashMap::from([
            (("Customer".to_string(), 0), vec!["Name:".to_string()]),
            (("CFO".to_string(), 0), vec!["Amount".to_string()]),
            (("Customer".to_string(), 1), vec!["I agree".to_string()]),
            (("CFO".to_string(), 1), Vec::new()),
        ]);

        Self {
            batches,
            fields,
            fail: false,
            field_calls: AtomicUsize::new(0),
        }
    }
}

impl DocumentStructureSource for FakeStructure {
    fn extract_structure(
        &self,
        _pages: &[PageImage],
        options: &StructureOptions,
    ) -> Result<StructureBatch> {
        if self.fail {
            return Err(anyhow!("oracle timed out"));
        }
        Ok(self
            .batches
            .get(options.batch_index)
            .cloned()
            .unwrap_or_default())
    }

    fn extract_signer_fields(
        &self,
        _pages: &[PageImage],
        signer_title: &str,
        options: &StructureOptions,
    ) -> Result<Vec<String>> {
        self.field_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .fields
            .get(&(signer_title.to_string(), options.batch_index))
            .cloned()
            .unwrap_or_default())
    }
}

struct FakePrompts {
    info: Option<PromptInfo>,
}

impl PromptInterpreter for FakePrompts {
    fn interpret(&self, _prompt: &str) -> Result<PromptInfo> {
        self.info
            .clone()
            .ok_or_else(|| anyhow!("prompt oracle returned non-json"))
    }
}

struct FakeVision {
    predictions: Option<Vec<FieldPrediction>>,
    prompts: Mutex<Vec<String>>,
    image_count: AtomicUsize,
}

impl FakeVision {
    fn answering(predictions: Vec<FieldPrediction>) -> Self {
        Self {
            predictions: Some(predictions),
            prompts: Mutex::new(Vec::new()),
            image_count: AtomicUsize::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            predictions: None,
            prompts: Mutex::new(Vec::new()),
            image_count: AtomicUsize::new(0),
        }
    }
}

impl VisionOracle for FakeVision {
    fn annotate(&self, pages: &[PageImage], prompt: &str) -> Result<Vec<FieldPrediction>> {
        self.prompts.lock().expect("lock").push(prompt.to_string());
        self.image_count.store(pages.len(), Ordering::SeqCst);
        self.predictions
            .clone()
            .ok_or_else(|| anyhow!("vision request timed out"))
    }
}

fn header(title: &str, signer_type: SignerType) -> SignerHeader {
    SignerHeader {
        title: title.to_string(),
        signer_type,
    }
}

fn config() -> PipelineConfig {
    PipelineConfig {
        batch_size: 1,
        ..PipelineConfig::default()
    }
}

fn no_prompt() -> FakePrompts {
    FakePrompts { info: None }
}

fn run(
    structure: &FakeStructure,
    engine: &FakeEngine,
    prompts: &FakePrompts,
    vision: Option<&FakeVision>,
    prompt: Option<&str>,
) -> Result<ResolutionRun, ResolveError> {
    let rasterizer = FakeRasterizer { pages: 2 };
    let sources = Sources {
        rasterizer: &rasterizer,
        fields: engine,
        structure,
        prompts,
        vision: vision.map(|value| value as &dyn VisionOracle),
    };
    resolve_template(DOCUMENT, prompt, &sources, &config())
}

fn label_of(run: &ResolutionRun, page: u32, x1: f64) -> Option<&str> {
    run.result
        .flow_elements
        .iter()
        .find(|element| element.page_number == page && element.position.x1 == x1)
        .and_then(|element| element.label.as_deref())
}

#[test]
fn resolves_fields_labels_overlaps_and_signers_end_to_end() {
    let structure = FakeStructure::two_signers();
    let engine = FakeEngine::new();

    let run = run(&structure, &engine, &no_prompt(), None, None).expect("resolve");
    let result = &run.result;

    assert_eq!(result.template_name, "Purchase order");
    assert_eq!(result.send_method_type, SendMethodType::Parallel);
    assert_eq!(result.languages, "heb");
    assert_eq!(result.page_count, 2);
    assert_eq!(result.sender_key, None);

    let titles = result
        .signers
        .iter()
        .map(|signer| signer.title.as_str())
        .collect::<Vec<&str>>();
    assert_eq!(titles, vec!["Customer", "CFO"]);
    assert_eq!(
        result.signers[0].fields,
        vec!["Name:".to_string(), "I agree".to_string()]
    );
    assert_eq!(result.signers[1].signer_type, SignerType::Static);

    // Page 3 is outside the two rendered pages; the overlapping pair on page 1 merged.
    assert_eq!(result.flow_elements.len(), 3);
    assert_eq!(run.counts.out_of_range_field_count, 1);
    assert_eq!(run.counts.merged_field_count, 1);
    assert_eq!(run.warnings.len(), 1);

    let merged = result
        .flow_elements
        .iter()
        .find(|element| element.position == Rect::new(10.0, 40.0, 140.0, 60.0))
        .expect("merged element");
    assert_eq!(merged.label.as_deref(), Some("Amount"));
    assert_eq!(merged.signer_index, 1);

    let checkbox = result
        .flow_elements
        .iter()
        .find(|element| element.page_number == 2)
        .expect("checkbox");
    assert_eq!(checkbox.element_type, ElementType::Checkbox);
    assert_eq!(checkbox.label.as_deref(), Some("I agree"));
    assert_eq!(checkbox.signer_index, 0);
    assert_eq!(label_of(&run, 1, 65.0), Some("Name:"));

    // Two titles across two batches.
    assert_eq!(structure.field_calls.load(Ordering::SeqCst), 4);
    assert_eq!(
        engine.languages_seen.lock().expect("lock").as_slice(),
        ["heb".to_string()]
    );
    assert_eq!(
        run.stages,
        vec![
            Stage::Extracting,
            Stage::Fusing,
            Stage::Deduplicating,
            Stage::Relabeling,
            Stage::AssigningSigners,
            Stage::Finalized
        ]
    );
}

#[test]
fn every_element_has_a_valid_page_and_signer() {
    let structure = FakeStructure::two_signers();
    let run = run(&structure, &FakeEngine::new(), &no_prompt(), None, None).expect("resolve");

    for element in &run.result.flow_elements {
        assert!((1..=2).contains(&element.page_number));
        assert!(element.signer_index < run.result.signers.len());
        if let Some(label) = &element.label {
            let owner = run
                .result
                .signers
                .iter()
                .position(|signer| signer.has_field(label))
                .expect("label owner");
            assert_eq!(owner, element.signer_index);
        }
    }
}

#[test]
fn reruns_on_the_same_document_are_identical() {
    let structure = FakeStructure::two_signers();
    let engine = FakeEngine::new();

    let first = run(&structure, &engine, &no_prompt(), None, None).expect("first");
    let second = run(&structure, &engine, &no_prompt(), None, None).expect("second");

    assert_eq!(first.result, second.result);
    assert!(first.result.flow_elements[0].element_id.starts_with("el-"));
}

#[test]
fn vision_labels_are_applied_before_signer_assignment() {
    let structure = FakeStructure::two_signers();
    // Marker 1 is the "Name:" field, marker 2 the merged field, marker 3 the checkbox.
    let vision = FakeVision::answering(vec![
        FieldPrediction {
            field_number: 2,
            label: "Total amount".to_string(),
            signer: Some("CFO".to_string()),
        },
        FieldPrediction {
            field_number: 3,
            label: "Terms accepted".to_string(),
            signer: Some("Customer".to_string()),
        },
    ]);

    let run = run(&structure, &FakeEngine::new(), &no_prompt(), Some(&vision), None)
        .expect("resolve");

    assert_eq!(run.counts.relabeled_field_count, 2);
    assert_eq!(label_of(&run, 1, 10.0), Some("Total amount"));
    assert_eq!(label_of(&run, 2, 10.0), Some("Terms accepted"));
    assert!(run.result.signers[1].has_field("Total amount"));

    let relabeled = run
        .result
        .flow_elements
        .iter()
        .find(|element| element.label.as_deref() == Some("Total amount"))
        .expect("relabeled");
    assert_eq!(relabeled.signer_index, 1);

    let prompts = vision.prompts.lock().expect("lock");
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Customer, CFO"));
    assert_eq!(vision.image_count.load(Ordering::SeqCst), 2);
}

#[test]
fn vision_failure_is_recorded_and_skipped() {
    let structure = FakeStructure::two_signers();
    let vision = FakeVision::failing();

    let run = run(&structure, &FakeEngine::new(), &no_prompt(), Some(&vision), None)
        .expect("resolve");

    assert_eq!(run.counts.relabeled_field_count, 0);
    assert_eq!(label_of(&run, 1, 10.0), Some("Amount"));
    assert!(
        run.warnings
            .iter()
            .any(|warning| warning.contains("vision oracle failed"))
    );
}

#[test]
fn relabeling_can_be_switched_off() {
    let structure = FakeStructure::two_signers();
    let vision = FakeVision::failing();
    let rasterizer = FakeRasterizer { pages: 2 };
    let engine = FakeEngine::new();
    let prompts = no_prompt();
    let sources = Sources {
        rasterizer: &rasterizer,
        fields: &engine,
        structure: &structure,
        prompts: &prompts,
        vision: Some(&vision),
    };
    let config = PipelineConfig {
        relabel: false,
        ..config()
    };

    let run = resolve_template(DOCUMENT, None, &sources, &config).expect("resolve");

    assert!(vision.prompts.lock().expect("lock").is_empty());
    assert_eq!(run.warnings.len(), 1);
}

#[test]
fn prompt_overrides_name_send_method_and_signers() {
    let structure = FakeStructure::two_signers();
    let prompts = FakePrompts {
        info: Some(PromptInfo {
            name: Some("Lease 2026".to_string()),
            sender_email: Some("owner@example.com".to_string()),
            send_method_type: Some(SendMethodType::Queued),
            signers: vec![
                PromptSigner {
                    title: "CFO".to_string(),
                    signer_type: Some(SignerType::Static),
                    fixed_signer: Some(FixedSigner {
                        phone_number: Some("+15550100".to_string()),
                        ..FixedSigner::default()
                    }),
                },
                PromptSigner {
                    title: "Notary".to_string(),
                    signer_type: None,
                    fixed_signer: None,
                },
            ],
        }),
    };

    let run = run(
        &structure,
        &FakeEngine::new(),
        &prompts,
        None,
        Some("Send the lease to our CFO"),
    )
    .expect("resolve");
    let result = &run.result;

    assert_eq!(result.template_name, "Lease 2026");
    assert_eq!(result.send_method_type, SendMethodType::Queued);
    assert_eq!(
        result.sender_key,
        Some(ParticipantKey {
            key_type: ParticipantKeyType::UserEmail,
            key: "owner@example.com".to_string()
        })
    );
    assert_eq!(result.signers.len(), 1);
    assert_eq!(result.signers[0].title, "CFO");
    assert_eq!(
        result.signers[0]
            .fixed_signer_key
            .as_ref()
            .map(|key| key.key_type),
        Some(ParticipantKeyType::UserPhone)
    );
    assert!(
        result
            .flow_elements
            .iter()
            .all(|element| element.signer_index == 0)
    );
    assert!(result.signers[0].has_field("Name:"));
}

#[test]
fn documents_without_signers_get_a_default_signer() {
    let structure = FakeStructure {
        batches: Vec::new(),
        fields: HashMap::new(),
        fail: false,
        field_calls: AtomicUsize::new(0),
    };

    let run = run(&structure, &FakeEngine::new(), &no_prompt(), None, None).expect("resolve");

    assert_eq!(run.result.template_name, UNTITLED_TEMPLATE);
    assert_eq!(run.result.languages, "eng");
    assert_eq!(run.result.signers.len(), 1);
    assert_eq!(run.result.signers[0].title, "Signer 1");
    assert_eq!(run.result.signers[0].signer_type, SignerType::Changeable);
    assert_eq!(
        run.result.signers[0].fields,
        vec![
            "Name:".to_string(),
            "Amount".to_string(),
            "I agree".to_string()
        ]
    );
    assert_eq!(structure.field_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn empty_or_non_pdf_documents_are_input_errors() {
    let structure = FakeStructure::two_signers();
    let engine = FakeEngine::new();
    let prompts = no_prompt();
    let rasterizer = FakeRasterizer { pages: 2 };
    let sources = Sources {
        rasterizer: &rasterizer,
        fields: &engine,
        structure: &structure,
        prompts: &prompts,
        vision: None,
    };

    let empty = resolve_template(b"", None, &sources, &config()).expect_err("empty");
    assert!(matches!(empty, ResolveError::Input(_)));

    let text = resolve_template(b"hello", None, &sources, &config()).expect_err("not a pdf");
    assert!(matches!(text, ResolveError::Input(_)));
}

#[test]
fn documents_without_pages_are_input_errors() {
    let structure = FakeStructure::two_signers();
    let engine = FakeEngine::new();
    let prompts = no_prompt();
    let rasterizer = FakeRasterizer { pages: 0 };
    let sources = Sources {
        rasterizer: &rasterizer,
        fields: &engine,
        structure: &structure,
        prompts: &prompts,
        vision: None,
    };

    let error = resolve_template(DOCUMENT, None, &sources, &config()).expect_err("no pages");
    assert!(matches!(error, ResolveError::Input(_)));
}

#[test]
fn structure_and_prompt_failures_are_fatal() {
    let mut structure = FakeStructure::two_signers();
    structure.fail = true;
    let error = run(&structure, &FakeEngine::new(), &no_prompt(), None, None)
        .expect_err("structure failure");
    assert!(matches!(
        error,
        ResolveError::Oracle {
            stage: Stage::Extracting,
            ..
        }
    ));
    assert!(error.to_string().contains("oracle timed out"));

    let structure = FakeStructure::two_signers();
    let error = run(
        &structure,
        &FakeEngine::new(),
        &no_prompt(),
        None,
        Some("two signers please"),
    )
    .expect_err("prompt failure");
    assert!(matches!(error, ResolveError::Oracle { .. }));
}

#[test]
fn engine_failure_is_a_source_error() {
    let structure = FakeStructure::two_signers();
    let mut engine = FakeEngine::new();
    engine.fail = true;

    let error = run(&structure, &engine, &no_prompt(), None, None).expect_err("engine failure");
    assert!(matches!(error, ResolveError::Source { .. }));
}

#[test]
fn stage_tracker_rejects_backward_transitions() {
    let mut tracker = StageTracker::new();
    tracker.enter(Stage::Extracting).expect("extracting");
    tracker.enter(Stage::Fusing).expect("fusing");

    assert!(tracker.enter(Stage::Extracting).is_err());
    assert_eq!(tracker.finish(), vec![Stage::Extracting, Stage::Fusing]);
}
