use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result, bail};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use super::{
    DocumentStructureSource, FieldPositionSource, PageImage, PromptInterpreter, StructureOptions,
    VisionOracle,
};
use crate::engine::{FormPositions, LayoutTree};
use crate::fusion::{SignerHeader, StructureBatch};
use crate::model::{
    FieldPrediction, FixedSigner, PromptInfo, PromptSigner, SendMethodType, SignerType,
};
use crate::util::{ensure_directory, scratch_path};

const STRUCTURE_INSTRUCTIONS: &str = "You are reading pages of a document that will be sent \
for electronic signature. Report the document's title as templateName, the languages it is \
written in as languages, whether signers sign one after another (sendMethodType 0) or all at \
once (sendMethodType 1), and every signer role that must fill in or sign something as \
signers[] of {title, signerType} where signerType is 0 for a changeable signer, 1 for a fixed \
person and 2 for an anonymous signer. Leave out anything these pages do not show.";

const SIGNER_FIELDS_INSTRUCTIONS: &str = "You are reading pages of a document that will be \
sent for electronic signature. List the labels of every field the signer named below must \
fill in or sign on these pages, as fields[], using each label exactly as printed. Return an \
empty list when the signer has nothing to fill in on these pages.";

const PROMPT_INSTRUCTIONS: &str = "You are reading a user's request for creating a signing \
template. Extract the template name, the sender's email, the send method (0 one after \
another, 1 all at once) and the signers the user mentions as signers[] of {title, \
signerType, fixedSigner}. signerType is 0 for a changeable signer, 1 for a fixed person and 2 \
for an anonymous signer; fixedSigner holds the email, phoneNumber, firstName and lastName of \
a fixed person when given. Leave out anything the request does not state.";

pub struct CommandEngine {
    program: String,
}

impl CommandEngine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn initialize(program: impl Into<String>) -> Result<Self> {
        let engine = Self::new(program);
        super::session::initialize(&engine.program)?;
        Ok(engine)
    }

    pub fn teardown(self) {
        super::session::teardown(&self.program);
    }

    fn run(&self, mode: &str, document: &[u8], language_hint: &str) -> Result<Vec<u8>> {
        let work_dir = scratch_path(&format!("engine_{mode}"));
        ensure_directory(&work_dir)?;

        let result = self.run_in(&work_dir, mode, document, language_hint);
        let _ = fs::remove_dir_all(&work_dir);
        result
    }

    fn run_in(
        &self,
        work_dir: &Path,
        mode: &str,
        document: &[u8],
        language_hint: &str,
    ) -> Result<Vec<u8>> {
        let pdf_path = work_dir.join("document.pdf");
        fs::write(&pdf_path, document)
            .with_context(|| format!("failed to write {}", pdf_path.display()))?;

        let output = Command::new(&self.program)
            .arg(mode)
            .arg(&pdf_path)
            .arg("--lang")
            .arg(language_hint)
            .output()
            .with_context(|| format!("failed to execute {} {}", self.program, mode))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("{} {} failed: {}", self.program, mode, stderr.trim());
        }

        Ok(output.stdout)
    }
}

impl FieldPositionSource for CommandEngine {
    fn extract_fields(&self, document: &[u8], language_hint: &str) -> Result<FormPositions> {
        let stdout = self.run("form", document, language_hint)?;
        serde_json::from_slice(&stdout)
            .with_context(|| format!("{} form returned invalid form positions", self.program))
    }

    fn extract_layout(&self, document: &[u8], language_hint: &str) -> Result<LayoutTree> {
        let stdout = self.run("structure", document, language_hint)?;
        serde_json::from_slice(&stdout)
            .with_context(|| format!("{} structure returned an invalid layout tree", self.program))
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct OracleRequest<'a> {
    pub task: &'a str,
    pub instructions: String,
    pub images: Vec<String>,
    pub schema: Value,
}

pub struct CommandOracle {
    program: String,
}

impl CommandOracle {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn ask(
        &self,
        task: &str,
        instructions: String,
        pages: &[PageImage],
        schema: Value,
    ) -> Result<Vec<u8>> {
        let work_dir = scratch_path(&format!("oracle_{task}"));
        ensure_directory(&work_dir)?;

        let result = write_page_images(&work_dir, pages).and_then(|images| {
            let request = OracleRequest {
                task,
                instructions,
                images,
                schema,
            };
            self.exchange(&request)
        });
        let _ = fs::remove_dir_all(&work_dir);
        result
    }

    fn exchange(&self, request: &OracleRequest<'_>) -> Result<Vec<u8>> {
        let body = serde_json::to_vec(request).context("failed to serialize oracle request")?;

        let mut child = Command::new(&self.program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to execute {}", self.program))?;

        {
            let mut stdin = child
                .stdin
                .take()
                .with_context(|| format!("{} did not expose stdin", self.program))?;
            stdin
                .write_all(&body)
                .with_context(|| format!("failed to send request to {}", self.program))?;
        }

        let output = child
            .wait_with_output()
            .with_context(|| format!("failed to wait for {}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{} returned non-zero exit status for task {}: {}",
                self.program,
                request.task,
                stderr.trim()
            );
        }

        debug!(task = request.task, bytes = output.stdout.len(), "oracle answered");
        Ok(output.stdout)
    }
}

fn write_page_images(work_dir: &Path, pages: &[PageImage]) -> Result<Vec<String>> {
    let mut paths = Vec::with_capacity(pages.len());
    for page in pages {
        let path: PathBuf = work_dir.join(format!("page-{}.png", page.page_number));
        fs::write(&path, &page.png[..])
            .with_context(|| format!("failed to write page image {}", path.display()))?;
        paths.push(path.display().to_string());
    }
    Ok(paths)
}

impl DocumentStructureSource for CommandOracle {
    fn extract_structure(
        &self,
        pages: &[PageImage],
        options: &StructureOptions,
    ) -> Result<StructureBatch> {
        let instructions = format!(
            "{STRUCTURE_INSTRUCTIONS} The pages start at page {}. Language hint: {}.",
            options.first_page, options.language_hint
        );
        debug!(
            batch = options.batch_index,
            pages = pages.len(),
            "requesting document structure"
        );
        let stdout = self.ask("structure", instructions, pages, structure_schema())?;
        parse_structure(&stdout)
    }

    fn extract_signer_fields(
        &self,
        pages: &[PageImage],
        signer_title: &str,
        options: &StructureOptions,
    ) -> Result<Vec<String>> {
        let instructions = format!(
            "{SIGNER_FIELDS_INSTRUCTIONS} Signer: {signer_title}. The pages start at page {}.",
            options.first_page
        );
        let stdout = self.ask("signer_fields", instructions, pages, signer_fields_schema())?;
        parse_signer_fields(&stdout)
    }
}

impl VisionOracle for CommandOracle {
    fn annotate(&self, pages: &[PageImage], prompt: &str) -> Result<Vec<FieldPrediction>> {
        let stdout = self.ask("annotate", prompt.to_string(), pages, annotation_schema())?;
        parse_annotation(&stdout)
    }
}

impl PromptInterpreter for CommandOracle {
    fn interpret(&self, prompt: &str) -> Result<PromptInfo> {
        let instructions = format!("{PROMPT_INSTRUCTIONS}\n\nRequest:\n{prompt}");
        let stdout = self.ask("prompt", instructions, &[], prompt_schema())?;
        parse_prompt_info(&stdout)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StructureResponse {
    #[serde(default)]
    template_name: Option<String>,
    #[serde(default)]
    send_method_type: Option<i64>,
    #[serde(default)]
    languages: Option<String>,
    signers: Vec<SignerResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignerResponse {
    title: String,
    #[serde(default)]
    signer_type: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SignerFieldsResponse {
    fields: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AnnotationResponse {
    fields: Vec<FieldPrediction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptResponse {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    sender_email: Option<String>,
    #[serde(default)]
    send_method_type: Option<i64>,
    #[serde(default)]
    signers: Vec<PromptSignerResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptSignerResponse {
    title: String,
    #[serde(default)]
    signer_type: Option<i64>,
    #[serde(default)]
    fixed_signer: Option<FixedSigner>,
}

fn decode<T: DeserializeOwned>(stdout: &[u8], what: &str) -> Result<T> {
    serde_json::from_slice(stdout).with_context(|| format!("oracle returned an invalid {what}"))
}

fn signer_type(code: Option<i64>) -> Result<Option<SignerType>> {
    match code {
        None => Ok(None),
        Some(code) => match SignerType::from_code(code) {
            Some(value) => Ok(Some(value)),
            None => bail!("unknown signer type code {code}"),
        },
    }
}

fn send_method_type(code: Option<i64>) -> Result<Option<SendMethodType>> {
    match code {
        None => Ok(None),
        Some(code) => match SendMethodType::from_code(code) {
            Some(value) => Ok(Some(value)),
            None => bail!("unknown send method code {code}"),
        },
    }
}

pub(crate) fn parse_structure(stdout: &[u8]) -> Result<StructureBatch> {
    let response: StructureResponse = decode(stdout, "structure answer")?;

    let mut signers = Vec::with_capacity(response.signers.len());
    for signer in response.signers {
        signers.push(SignerHeader {
            title: signer.title,
            signer_type: signer_type(signer.signer_type)?.unwrap_or_default(),
        });
    }

    Ok(StructureBatch {
        template_name: response.template_name,
        send_method_type: send_method_type(response.send_method_type)?,
        languages: response.languages,
        signers,
    })
}

pub(crate) fn parse_signer_fields(stdout: &[u8]) -> Result<Vec<String>> {
    let response: SignerFieldsResponse = decode(stdout, "signer field list")?;
    Ok(response.fields)
}

pub(crate) fn parse_annotation(stdout: &[u8]) -> Result<Vec<FieldPrediction>> {
    let response: AnnotationResponse = decode(stdout, "field annotation answer")?;
    Ok(response.fields)
}

pub(crate) fn parse_prompt_info(stdout: &[u8]) -> Result<PromptInfo> {
    let response: PromptResponse = decode(stdout, "prompt interpretation")?;

    let mut signers = Vec::with_capacity(response.signers.len());
    for signer in response.signers {
        signers.push(PromptSigner {
            title: signer.title,
            signer_type: signer_type(signer.signer_type)?,
            fixed_signer: signer.fixed_signer,
        });
    }

    Ok(PromptInfo {
        name: response.name,
        sender_email: response.sender_email,
        send_method_type: send_method_type(response.send_method_type)?,
        signers,
    })
}

fn structure_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "templateName": { "type": ["string", "null"] },
            "sendMethodType": { "type": ["integer", "null"], "enum": [0, 1, null] },
            "languages": { "type": ["string", "null"] },
            "signers": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "title": { "type": "string" },
                        "signerType": { "type": "integer", "enum": [0, 1, 2] }
                    },
                    "required": ["title", "signerType"]
                }
            }
        },
        "required": ["signers"]
    })
}

fn signer_fields_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "fields": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["fields"]
    })
}

fn annotation_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "fields": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "fieldNumber": { "type": "integer" },
                        "label": { "type": "string" },
                        "signer": { "type": ["string", "null"] }
                    },
                    "required": ["fieldNumber", "label"]
                }
            }
        },
        "required": ["fields"]
    })
}

fn prompt_schema() -> Value {
    let fixed_signer = json!({
        "type": ["object", "null"],
        "properties": {
            "email": { "type": ["string", "null"] },
            "phoneNumber": { "type": ["string", "null"] },
            "firstName": { "type": ["string", "null"] },
            "lastName": { "type": ["string", "null"] }
        }
    });

    json!({
        "type": "object",
        "properties": {
            "name": { "type": ["string", "null"] },
            "senderEmail": { "type": ["string", "null"] },
            "sendMethodType": { "type": ["integer", "null"], "enum": [0, 1, null] },
            "signers": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "title": { "type": "string" },
                        "signerType": { "type": ["integer", "null"], "enum": [0, 1, 2, null] },
                        "fixedSigner": fixed_signer
                    },
                    "required": ["title"]
                }
            }
        }
    })
}
