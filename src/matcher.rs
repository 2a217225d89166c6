use anyhow::{Context, Result};
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::model::{ElementType, FieldRectangle, FlowElement, TextBlock};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchOptions {
    pub vertical_overlap_ratio: f64,
    pub right_side_tolerance: f64,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            vertical_overlap_ratio: 0.30,
            right_side_tolerance: 3.0,
        }
    }
}

pub struct LabelMatcher {
    options: MatchOptions,
    punctuation_only: Regex,
}

impl LabelMatcher {
    pub fn new(options: MatchOptions) -> Result<Self> {
        let punctuation_only =
            Regex::new(r"^\p{P}+$").context("failed to compile punctuation regex")?;
        Ok(Self {
            options,
            punctuation_only,
        })
    }

    pub fn match_field(
        &self,
        field: &FieldRectangle,
        blocks: &[TextBlock],
        element_id: String,
    ) -> FlowElement {
        FlowElement {
            element_id,
            page_number: field.page_number,
            position: field.rect,
            label: self.best_label(field, blocks).map(ToOwned::to_owned),
            element_type: ElementType::from(field.field_type),
            signer_index: 0,
        }
    }

    pub fn match_fields(
        &self,
        fields: &[FieldRectangle],
        blocks: &[TextBlock],
        id_seed: &str,
    ) -> Vec<FlowElement> {
        fields
            .iter()
            .enumerate()
            .map(|(sequence, field)| {
                let element_id = element_id_for(id_seed, field.page_number, sequence);
                self.match_field(field, blocks, element_id)
            })
            .collect()
    }

    fn best_label<'a>(&self, field: &FieldRectangle, blocks: &'a [TextBlock]) -> Option<&'a str> {
        let overlapping = blocks
            .iter()
            .filter(|block| block.page_number == field.page_number)
            .filter(|block| self.overlaps_vertically(field, block))
            .collect::<Vec<&TextBlock>>();
        if overlapping.is_empty() {
            return None;
        }

        let right_edge = field.rect.x2 - self.options.right_side_tolerance;
        let right_side = overlapping
            .iter()
            .copied()
            .filter(|block| block.rect.x1 >= right_edge)
            .collect::<Vec<&TextBlock>>();
        let candidates = if right_side.is_empty() {
            overlapping
        } else {
            right_side
        };

        let mut valid = candidates
            .iter()
            .copied()
            .filter(|block| !self.is_punctuation_only(&block.text))
            .collect::<Vec<&TextBlock>>();
        if valid.is_empty() {
            valid = candidates;
        }

        let mut best: Option<(&TextBlock, f64)> = None;
        for block in valid {
            let gap = horizontal_gap(field, block);
            match best {
                Some((_, best_gap)) if gap >= best_gap => {}
                _ => best = Some((block, gap)),
            }
        }

        best.map(|(block, _)| block.text.as_str())
    }

    fn overlaps_vertically(&self, field: &FieldRectangle, block: &TextBlock) -> bool {
        let overlap = field.rect.y2.min(block.rect.y2) - field.rect.y1.max(block.rect.y1);
        if overlap <= 0.0 {
            return false;
        }

        let min_height = field.rect.height().min(block.rect.height());
        overlap >= min_height * self.options.vertical_overlap_ratio
    }

    fn is_punctuation_only(&self, text: &str) -> bool {
        self.punctuation_only.is_match(text.trim())
    }
}

fn horizontal_gap(field: &FieldRectangle, block: &TextBlock) -> f64 {
    if block.rect.x1 >= field.rect.x2 {
        return block.rect.x1 - field.rect.x2;
    }
    if block.rect.x2 <= field.rect.x1 {
        return field.rect.x1 - block.rect.x2;
    }

    (block.rect.x1 - field.rect.x1)
        .abs()
        .min((block.rect.x2 - field.rect.x2).abs())
}

pub fn element_id_for(id_seed: &str, page_number: u32, sequence: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(id_seed.as_bytes());
    hasher.update(format!(":{page_number}:{sequence}").as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("el-{}", &digest[..16])
}
