use crate::engine::{page_number_or_position, ContentNode, LayoutElement, LayoutTree, TableRow};
use crate::geometry::Rect;
use crate::model::TextBlock;

mod rtl;

pub use rtl::fix_rtl;

// Nodes with blank text or no usable rect are skipped, but their children are still visited.
pub fn index_text_blocks(tree: &LayoutTree) -> Vec<TextBlock> {
    let mut blocks = Vec::new();

    for (index, page) in tree.pages.iter().enumerate() {
        let page_number = page_number_or_position(page.properties.as_ref(), index);
        for element in &page.elements {
            collect_element(element, page_number, &mut blocks);
        }
    }

    blocks
}

fn collect_element(element: &LayoutElement, page_number: u32, blocks: &mut Vec<TextBlock>) {
    for content in &element.contents {
        collect_content(content, page_number, blocks);
    }

    for nested in &element.nested_elements {
        collect_element(nested, page_number, blocks);
    }

    collect_rows(&element.trs, page_number, blocks);
    if let Some(table) = &element.table {
        collect_rows(&table.trs, page_number, blocks);
    }
}

fn collect_content(node: &ContentNode, page_number: u32, blocks: &mut Vec<TextBlock>) {
    if let Some(block) = text_block_for(node, page_number) {
        blocks.push(block);
    }

    for nested in &node.contents {
        collect_content(nested, page_number, blocks);
    }

    if let Some(table) = &node.table {
        collect_rows(&table.trs, page_number, blocks);
    }
}

fn collect_rows(rows: &[TableRow], page_number: u32, blocks: &mut Vec<TextBlock>) {
    for cell in rows.iter().flat_map(|row| row.tds.iter()) {
        for content in &cell.contents {
            collect_content(content, page_number, blocks);
        }
    }
}

fn text_block_for(node: &ContentNode, page_number: u32) -> Option<TextBlock> {
    let text = node.text.as_deref()?.trim();
    if text.is_empty() {
        return None;
    }

    let rect = node
        .rect
        .as_deref()
        .and_then(Rect::from_components)
        .filter(|rect| !rect.is_degenerate())?;

    Some(TextBlock {
        text: fix_rtl(text),
        rect,
        page_number,
    })
}
