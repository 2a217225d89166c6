use serde::Deserialize;
use tracing::debug;

use crate::geometry::Rect;
use crate::model::{FieldKind, FieldRectangle};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageProperties {
    #[serde(default)]
    pub page_number: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormPositions {
    #[serde(default)]
    pub pages: Vec<FormPage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormPage {
    #[serde(default)]
    pub properties: Option<PageProperties>,
    #[serde(default)]
    pub form_elements: Vec<FormElement>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormElement {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub rect: Vec<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutTree {
    #[serde(default)]
    pub pages: Vec<LayoutPage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutPage {
    #[serde(default)]
    pub properties: Option<PageProperties>,
    #[serde(default)]
    pub elements: Vec<LayoutElement>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutElement {
    #[serde(default)]
    pub contents: Vec<ContentNode>,
    #[serde(default)]
    pub nested_elements: Vec<LayoutElement>,
    #[serde(default)]
    pub trs: Vec<TableRow>,
    #[serde(default)]
    pub table: Option<LayoutTable>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentNode {
    #[serde(default)]
    pub rect: Option<Vec<f64>>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub contents: Vec<ContentNode>,
    #[serde(default)]
    pub table: Option<LayoutTable>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutTable {
    #[serde(default)]
    pub trs: Vec<TableRow>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRow {
    #[serde(default)]
    pub tds: Vec<TableCell>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableCell {
    #[serde(default)]
    pub contents: Vec<ContentNode>,
}

pub fn page_number_or_position(properties: Option<&PageProperties>, index: usize) -> u32 {
    properties
        .and_then(|value| value.page_number)
        .filter(|value| *value > 0)
        .unwrap_or((index + 1) as u32)
}

pub fn field_rectangles(positions: &FormPositions) -> (Vec<FieldRectangle>, usize) {
    let mut fields = Vec::new();
    let mut degenerate = 0usize;

    for (index, page) in positions.pages.iter().enumerate() {
        let page_number = page_number_or_position(page.properties.as_ref(), index);

        for element in &page.form_elements {
            let Some(rect) = Rect::from_components(&element.rect) else {
                debug!(page = page_number, kind = %element.kind, "form element without rect");
                degenerate += 1;
                continue;
            };
            if rect.is_degenerate() {
                debug!(page = page_number, kind = %element.kind, "skipping degenerate form element");
                degenerate += 1;
                continue;
            }

            fields.push(FieldRectangle {
                rect,
                page_number,
                field_type: FieldKind::from_engine_type(&element.kind),
            });
        }
    }

    (fields, degenerate)
}
