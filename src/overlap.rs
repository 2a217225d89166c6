use tracing::debug;

use crate::geometry::{area, intersection_area, union};
use crate::model::FlowElement;

pub const DEFAULT_OVERLAP_THRESHOLD: f64 = 0.2;

// Greedy: the first qualifying pair in index order merges, the result is appended and the
// scan restarts. Order-dependent for three or more mutual overlaps, but reproducible.
pub fn resolve_overlaps(elements: Vec<FlowElement>, threshold: f64) -> Vec<FlowElement> {
    let mut pages = Vec::<(u32, Vec<FlowElement>)>::new();
    for element in elements {
        match pages
            .iter_mut()
            .find(|(page_number, _)| *page_number == element.page_number)
        {
            Some((_, page_elements)) => page_elements.push(element),
            None => pages.push((element.page_number, vec![element])),
        }
    }

    pages
        .into_iter()
        .flat_map(|(page_number, page_elements)| {
            resolve_page(page_number, page_elements, threshold)
        })
        .collect()
}

fn resolve_page(
    page_number: u32,
    mut elements: Vec<FlowElement>,
    threshold: f64,
) -> Vec<FlowElement> {
    while let Some((first_index, second_index)) = first_overlapping_pair(&elements, threshold) {
        let second = elements.remove(second_index);
        let first = elements.remove(first_index);
        debug!(
            page = page_number,
            kept = %first.element_id,
            absorbed = %second.element_id,
            "merging overlapping fields"
        );
        elements.push(merge_elements(first, second));
    }

    elements
}

fn first_overlapping_pair(elements: &[FlowElement], threshold: f64) -> Option<(usize, usize)> {
    for i in 0..elements.len() {
        for j in (i + 1)..elements.len() {
            if elements[i].element_id == elements[j].element_id {
                continue;
            }
            if is_significant_overlap(&elements[i], &elements[j], threshold) {
                return Some((i, j));
            }
        }
    }

    None
}

pub fn is_significant_overlap(first: &FlowElement, second: &FlowElement, threshold: f64) -> bool {
    let overlap = intersection_area(&first.position, &second.position);
    if overlap <= 0.0 {
        return false;
    }

    let smaller = area(&first.position).min(area(&second.position));
    overlap > threshold * smaller
}

pub fn merge_elements(first: FlowElement, second: FlowElement) -> FlowElement {
    let position = union(&first.position, &second.position);
    debug_assert!(position.contains(&first.position) && position.contains(&second.position));

    FlowElement {
        position,
        label: first.label.or(second.label),
        ..first
    }
}
