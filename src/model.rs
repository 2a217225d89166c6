use serde::{Deserialize, Serialize};

use crate::geometry::Rect;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
    pub rect: Rect,
    pub page_number: u32,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum FieldKind {
    Checkbox,
    Text,
    Signature,
}

impl FieldKind {
    pub fn from_engine_type(raw: &str) -> Self {
        match raw.trim() {
            "formCheckBox" | "checkbox" => Self::Checkbox,
            "formDigitalSignature" | "digital-signature" => Self::Signature,
            _ => Self::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRectangle {
    pub rect: Rect,
    pub page_number: u32,
    pub field_type: FieldKind,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ElementType {
    Checkbox,
    Text,
    Sign,
}

impl From<FieldKind> for ElementType {
    fn from(kind: FieldKind) -> Self {
        match kind {
            FieldKind::Checkbox => Self::Checkbox,
            FieldKind::Text => Self::Text,
            FieldKind::Signature => Self::Sign,
        }
    }
}

impl ElementType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Checkbox => "checkbox",
            Self::Text => "text",
            Self::Sign => "sign",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowElement {
    pub element_id: String,
    pub page_number: u32,
    pub position: Rect,
    pub label: Option<String>,
    pub element_type: ElementType,
    pub signer_index: usize,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum SignerType {
    #[default]
    Changeable,
    Static,
    Anonymous,
}

impl SignerType {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Changeable),
            1 => Some(Self::Static),
            2 => Some(Self::Anonymous),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Changeable => "changeable",
            Self::Static => "static",
            Self::Anonymous => "anonymous",
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum SendMethodType {
    #[default]
    Queued,
    Parallel,
}

impl SendMethodType {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Queued),
            1 => Some(Self::Parallel),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Parallel => "parallel",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ParticipantKeyType {
    UserEmail,
    UserPhone,
}

impl ParticipantKeyType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserEmail => "user_email",
            Self::UserPhone => "user_phone",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantKey {
    pub key_type: ParticipantKeyType,
    pub key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixedSigner {
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignerProfile {
    pub title: String,
    pub signer_type: SignerType,
    pub fields: Vec<String>,
    pub fixed_signer_key: Option<ParticipantKey>,
}

impl SignerProfile {
    pub fn new(title: impl Into<String>, signer_type: SignerType) -> Self {
        Self {
            title: title.into(),
            signer_type,
            fields: Vec::new(),
            fixed_signer_key: None,
        }
    }

    pub fn has_field(&self, label: &str) -> bool {
        self.fields.iter().any(|field| field == label)
    }

    pub fn add_field(&mut self, label: &str) -> bool {
        push_unique_label(&mut self.fields, label)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptSigner {
    pub title: String,
    pub signer_type: Option<SignerType>,
    pub fixed_signer: Option<FixedSigner>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptInfo {
    pub name: Option<String>,
    pub sender_email: Option<String>,
    pub send_method_type: Option<SendMethodType>,
    pub signers: Vec<PromptSigner>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldPrediction {
    pub field_number: usize,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub signer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateResolutionResult {
    pub template_name: String,
    pub send_method_type: SendMethodType,
    pub languages: String,
    pub sender_key: Option<ParticipantKey>,
    pub page_count: usize,
    pub signers: Vec<SignerProfile>,
    pub flow_elements: Vec<FlowElement>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolveCounts {
    pub page_count: usize,
    pub structure_batch_count: usize,
    pub text_block_count: usize,
    pub field_rectangle_count: usize,
    pub degenerate_field_count: usize,
    pub out_of_range_field_count: usize,
    pub matched_label_count: usize,
    pub merged_field_count: usize,
    pub relabeled_field_count: usize,
    pub signer_count: usize,
    pub flow_element_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolveRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub document_path: String,
    pub document_sha256: String,
    pub result_path: String,
    pub db_path: String,
    pub completed_stages: Vec<String>,
    pub counts: ResolveCounts,
    pub warnings: Vec<String>,
}

pub fn push_unique_label(labels: &mut Vec<String>, label: &str) -> bool {
    let trimmed = label.trim();
    if trimmed.is_empty() || labels.iter().any(|existing| existing == trimmed) {
        return false;
    }

    labels.push(trimmed.to_string());
    true
}
