use std::collections::HashMap;

use tracing::{debug, info};

use crate::model::{
    FieldPrediction, FixedSigner, FlowElement, ParticipantKey, ParticipantKeyType, PromptSigner,
    SignerProfile, SignerType,
};

pub const DEFAULT_SIGNER_TITLE: &str = "Signer 1";

pub fn resolve_signers(
    prompt_signers: Option<&[PromptSigner]>,
    extracted: &[SignerProfile],
) -> Vec<SignerProfile> {
    let prompt_signers = prompt_signers.unwrap_or_default();

    let mut resolved = Vec::<SignerProfile>::new();
    for prompt in prompt_signers {
        let title = prompt.title.as_str();
        let Some(found) = extracted.iter().find(|signer| signer.title == title) else {
            debug!(title, "prompt signer has no extracted counterpart");
            continue;
        };
        if resolved.iter().any(|signer| signer.title == title) {
            continue;
        }

        let signer_type = prompt.signer_type.unwrap_or(found.signer_type);
        resolved.push(SignerProfile {
            title: title.to_string(),
            signer_type,
            fields: found.fields.clone(),
            fixed_signer_key: fixed_signer_key(signer_type, prompt.fixed_signer.as_ref()),
        });
    }

    if !resolved.is_empty() {
        info!(count = resolved.len(), "using prompt signers");
        return resolved;
    }

    extracted.to_vec()
}

// Email beats phone.
pub fn fixed_signer_key(
    signer_type: SignerType,
    fixed_signer: Option<&FixedSigner>,
) -> Option<ParticipantKey> {
    if signer_type != SignerType::Static {
        return None;
    }

    let FixedSigner {
        email,
        phone_number,
        ..
    } = fixed_signer?;

    if let Some(email) = non_empty(email.as_deref()) {
        return Some(ParticipantKey {
            key_type: ParticipantKeyType::UserEmail,
            key: email.to_string(),
        });
    }

    non_empty(phone_number.as_deref()).map(|phone| ParticipantKey {
        key_type: ParticipantKeyType::UserPhone,
        key: phone.to_string(),
    })
}

pub fn apply_relabels(
    elements: Vec<FlowElement>,
    signers: Vec<SignerProfile>,
    markers: &HashMap<usize, String>,
    predictions: &[FieldPrediction],
) -> (Vec<FlowElement>, Vec<SignerProfile>, usize) {
    let mut labels_by_id = HashMap::<&str, &str>::new();
    let mut signers = signers;

    for prediction in predictions {
        let label = prediction.label.trim();
        if label.is_empty() {
            continue;
        }
        let Some(element_id) = markers.get(&prediction.field_number) else {
            debug!(number = prediction.field_number, "prediction for unknown marker");
            continue;
        };

        labels_by_id.insert(element_id.as_str(), label);

        let signer_title = prediction.signer.as_deref().map(str::trim);
        if let Some(signer) = signers
            .iter_mut()
            .find(|signer| Some(signer.title.as_str()) == signer_title)
        {
            signer.add_field(label);
        }
    }

    let mut relabeled = 0usize;
    let elements = elements
        .into_iter()
        .map(|element| match labels_by_id.get(element.element_id.as_str()) {
            Some(label) => {
                relabeled += 1;
                FlowElement {
                    label: Some(label.to_string()),
                    ..element
                }
            }
            None => element,
        })
        .collect();

    (elements, signers, relabeled)
}

pub fn assign_signers(
    signers: Vec<SignerProfile>,
    elements: Vec<FlowElement>,
) -> (Vec<SignerProfile>, Vec<FlowElement>) {
    let mut signers = signers;
    if signers.is_empty() {
        info!(title = DEFAULT_SIGNER_TITLE, "no signers resolved, using default signer");
        signers.push(SignerProfile::new(DEFAULT_SIGNER_TITLE, SignerType::Changeable));
    }

    let mut assigned = Vec::with_capacity(elements.len());
    for element in elements {
        let label = element
            .label
            .as_deref()
            .map(str::trim)
            .filter(|label| !label.is_empty());

        let signer_index = match label {
            Some(label) => match signers.iter().position(|signer| signer.has_field(label)) {
                Some(index) => index,
                None => {
                    signers[0].add_field(label);
                    0
                }
            },
            None => 0,
        };

        assigned.push(FlowElement {
            signer_index,
            ..element
        });
    }

    (signers, assigned)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
