use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use ab_glyph::{FontRef, PxScale};
use anyhow::{Context, Result};
use image::{ImageFormat, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect as PixelRect;
use rayon::prelude::*;
use tracing::warn;

use crate::model::FlowElement;
use crate::sources::PageImage;

pub const POINTS_PER_INCH: f64 = 72.0;

const OUTLINE_WIDTH: i32 = 3;
const NUMBER_SCALE: f32 = 20.0;
const GLYPH_CELL: i32 = 4;
const GLYPH_SPACING: i32 = 4;
const LABEL_PADDING: i32 = 4;

const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

const FONT_PATHS: [&str; 4] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

// Fallback 3x5 digits for hosts without any of FONT_PATHS, high bit on the left.
const DIGITS: [[u8; 5]; 10] = [
    [0b111, 0b101, 0b101, 0b101, 0b111],
    [0b010, 0b110, 0b010, 0b010, 0b111],
    [0b111, 0b001, 0b111, 0b100, 0b111],
    [0b111, 0b001, 0b111, 0b001, 0b111],
    [0b101, 0b101, 0b111, 0b001, 0b001],
    [0b111, 0b100, 0b111, 0b001, 0b111],
    [0b111, 0b100, 0b111, 0b101, 0b111],
    [0b111, 0b001, 0b001, 0b001, 0b001],
    [0b111, 0b101, 0b111, 0b101, 0b111],
    [0b111, 0b101, 0b111, 0b001, 0b111],
];

pub fn point_to_pixel_scale(render_dpi: u32) -> f64 {
    f64::from(render_dpi) / POINTS_PER_INCH
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMarker {
    pub number: usize,
    pub element_id: String,
    pub page_number: u32,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

// Page order first, then element order within a page. The oracle answers with these numbers.
pub fn plan_markers(elements: &[FlowElement], scale: f64) -> Vec<FieldMarker> {
    let mut ordered = elements.iter().collect::<Vec<&FlowElement>>();
    ordered.sort_by_key(|element| element.page_number);

    ordered
        .into_iter()
        .enumerate()
        .map(|(index, element)| {
            let rect = &element.position;
            FieldMarker {
                number: index + 1,
                element_id: element.element_id.clone(),
                page_number: element.page_number,
                x: (rect.x1 * scale) as i32,
                y: (rect.y1 * scale) as i32,
                width: ((rect.width() * scale) as u32).max(1),
                height: ((rect.height() * scale) as u32).max(1),
            }
        })
        .collect()
}

pub fn marker_index(markers: &[FieldMarker]) -> HashMap<usize, String> {
    markers
        .iter()
        .map(|marker| (marker.number, marker.element_id.clone()))
        .collect()
}

pub fn annotate_pages(pages: &[PageImage], markers: &[FieldMarker]) -> Result<Vec<PageImage>> {
    let font_data = load_font_data();
    if font_data.is_none() {
        warn!("no system font found, drawing marker numbers with the built-in digits");
    }

    pages
        .par_iter()
        .map(|page| {
            let page_markers = markers
                .iter()
                .filter(|marker| marker.page_number == page.page_number)
                .collect::<Vec<&FieldMarker>>();
            if page_markers.is_empty() {
                return Ok(page.clone());
            }

            let font = font_data
                .as_deref()
                .and_then(|data| FontRef::try_from_slice(data).ok());
            let png = draw_markers(&page.png, &page_markers, font.as_ref())
                .with_context(|| format!("failed to annotate page {}", page.page_number))?;
            Ok(PageImage {
                page_number: page.page_number,
                png: Arc::from(png),
            })
        })
        .collect()
}

fn load_font_data() -> Option<Vec<u8>> {
    FONT_PATHS
        .iter()
        .filter_map(|path| std::fs::read(path).ok())
        .find(|data| FontRef::try_from_slice(data).is_ok())
}

pub fn draw_markers(
    png: &[u8],
    markers: &[&FieldMarker],
    font: Option<&FontRef>,
) -> Result<Vec<u8>> {
    let mut canvas = image::load_from_memory_with_format(png, ImageFormat::Png)
        .context("failed to decode page image")?
        .to_rgba8();

    for marker in markers {
        draw_outline(&mut canvas, marker);
        match font {
            Some(font) => draw_number(&mut canvas, marker, font),
            None => draw_digits(&mut canvas, marker),
        }
    }

    let mut encoded = Cursor::new(Vec::new());
    canvas
        .write_to(&mut encoded, ImageFormat::Png)
        .context("failed to encode annotated page image")?;
    Ok(encoded.into_inner())
}

fn draw_outline(canvas: &mut RgbaImage, marker: &FieldMarker) {
    for t in 0..OUTLINE_WIDTH {
        let rect = PixelRect::at(marker.x - t, marker.y - t).of_size(
            marker.width + (2 * t) as u32,
            marker.height + (2 * t) as u32,
        );
        draw_hollow_rect_mut(canvas, rect, RED);
    }
}

fn draw_number(canvas: &mut RgbaImage, marker: &FieldMarker, font: &FontRef) {
    let label = marker.number.to_string();
    let scale = PxScale::from(NUMBER_SCALE);
    let (text_width, text_height) = text_size(scale, font, &label);

    let (box_x, box_y) = number_box(
        canvas,
        marker,
        text_width as i32 + 2 * LABEL_PADDING,
        text_height as i32 + 2 * LABEL_PADDING,
    );
    draw_text_mut(
        canvas,
        BLACK,
        box_x + LABEL_PADDING,
        box_y + LABEL_PADDING,
        scale,
        font,
        &label,
    );
}

fn draw_digits(canvas: &mut RgbaImage, marker: &FieldMarker) {
    let digits = marker
        .number
        .to_string()
        .bytes()
        .map(|digit| usize::from(digit - b'0'))
        .collect::<Vec<usize>>();
    let count = digits.len() as i32;

    let glyph_width = 3 * GLYPH_CELL;
    let glyph_height = 5 * GLYPH_CELL;
    let (box_x, box_y) = number_box(
        canvas,
        marker,
        count * glyph_width + (count - 1) * GLYPH_SPACING + 2 * LABEL_PADDING,
        glyph_height + 2 * LABEL_PADDING,
    );

    for (position, digit) in digits.into_iter().enumerate() {
        let origin_x = box_x + LABEL_PADDING + position as i32 * (glyph_width + GLYPH_SPACING);
        let origin_y = box_y + LABEL_PADDING;
        for (row, bits) in DIGITS[digit].iter().enumerate() {
            for column in 0..3 {
                if bits & (0b100 >> column) == 0 {
                    continue;
                }
                let cell = PixelRect::at(
                    origin_x + column * GLYPH_CELL,
                    origin_y + row as i32 * GLYPH_CELL,
                )
                .of_size(GLYPH_CELL as u32, GLYPH_CELL as u32);
                draw_filled_rect_mut(canvas, cell, BLACK);
            }
        }
    }
}

// White box above the field when there is room, otherwise over its top-left corner.
fn number_box(canvas: &mut RgbaImage, marker: &FieldMarker, width: i32, height: i32) -> (i32, i32) {
    let box_x = marker.x.max(0);
    let above = marker.y - OUTLINE_WIDTH - height;
    let box_y = if above >= 0 { above } else { marker.y.max(0) };

    draw_filled_rect_mut(
        canvas,
        PixelRect::at(box_x, box_y).of_size(width.max(1) as u32, height.max(1) as u32),
        WHITE,
    );
    (box_x, box_y)
}

pub fn relabel_prompt(signer_titles: &[String]) -> String {
    let mut prompt = String::from(
        "The page images show form fields outlined in red, each with a number in a white box. \
         For every numbered field, read the label printed next to it on the page and report it \
         as fields[] entries of {fieldNumber, label, signer}. Use the label text as it appears \
         on the page.",
    );

    match signer_titles {
        [only] => {
            prompt.push_str(&format!(" Use Signer={only} for every field."));
        }
        titles if titles.len() > 1 => {
            prompt.push_str(&format!(
                " The signers of this document are: {}. Each field belongs to exactly one signer; \
                 set signer to that signer's title.",
                titles.join(", ")
            ));
        }
        _ => {}
    }

    prompt
}
