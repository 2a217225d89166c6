// Batch results are folded in batch-index order, never arrival order.

use serde::{Deserialize, Serialize};

use crate::model::{push_unique_label, SendMethodType, SignerProfile, SignerType};

#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult<T> {
    pub batch_index: usize,
    pub value: T,
}

impl<T> BatchResult<T> {
    pub fn new(batch_index: usize, value: T) -> Self {
        Self { batch_index, value }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerHeader {
    pub title: String,
    pub signer_type: SignerType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructureBatch {
    pub template_name: Option<String>,
    pub send_method_type: Option<SendMethodType>,
    pub languages: Option<String>,
    pub signers: Vec<SignerHeader>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FusedStructure {
    pub template_name: Option<String>,
    pub send_method_type: Option<SendMethodType>,
    pub languages: Option<String>,
    pub signers: Vec<SignerHeader>,
}

impl FusedStructure {
    pub fn absorb(&mut self, batch: &StructureBatch) {
        if self.template_name.is_none() {
            self.template_name = non_blank(batch.template_name.as_deref());
        }
        if self.send_method_type.is_none() {
            self.send_method_type = batch.send_method_type;
        }
        if self.languages.is_none() {
            self.languages = non_blank(batch.languages.as_deref());
        }

        for signer in &batch.signers {
            let title = signer.title.trim();
            if title.is_empty() {
                continue;
            }
            let known = self
                .signers
                .iter()
                .any(|existing| existing.title == title && existing.signer_type == signer.signer_type);
            if !known {
                self.signers.push(SignerHeader {
                    title: title.to_string(),
                    signer_type: signer.signer_type,
                });
            }
        }
    }
}

pub fn fuse_structure(mut batches: Vec<BatchResult<StructureBatch>>) -> FusedStructure {
    batches.sort_by_key(|batch| batch.batch_index);

    let mut fused = FusedStructure::default();
    for batch in &batches {
        fused.absorb(&batch.value);
    }
    fused
}

pub fn fuse_signer_fields(mut batches: Vec<BatchResult<Vec<String>>>) -> Vec<String> {
    batches.sort_by_key(|batch| batch.batch_index);

    let mut fields = Vec::new();
    for batch in &batches {
        for label in &batch.value {
            push_unique_label(&mut fields, label);
        }
    }
    fields
}

pub fn build_signer_profiles(
    headers: &[SignerHeader],
    fields_for: impl Fn(&str) -> Vec<String>,
) -> Vec<SignerProfile> {
    let mut profiles = Vec::<SignerProfile>::new();

    for header in headers {
        let fields = fields_for(&header.title);
        match profiles
            .iter_mut()
            .find(|profile| profile.title == header.title)
        {
            Some(profile) => {
                for label in &fields {
                    profile.add_field(label);
                }
            }
            None => {
                let mut profile = SignerProfile::new(header.title.clone(), header.signer_type);
                for label in &fields {
                    profile.add_field(label);
                }
                profiles.push(profile);
            }
        }
    }

    profiles
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}
