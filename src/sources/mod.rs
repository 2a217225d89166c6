use std::sync::Arc;

use anyhow::Result;

use crate::engine::{FormPositions, LayoutTree};
use crate::fusion::StructureBatch;
use crate::model::{FieldPrediction, PromptInfo};

mod command;
mod pdftoppm;
pub mod session;

pub use command::{CommandEngine, CommandOracle};
pub use pdftoppm::PdftoppmRasterizer;

#[derive(Debug, Clone, PartialEq)]
pub struct PageImage {
    pub page_number: u32,
    pub png: Arc<[u8]>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructureOptions {
    pub batch_index: usize,
    pub first_page: u32,
    pub language_hint: String,
}

pub trait DocumentRasterizer: Send + Sync {
    fn to_images(&self, document: &[u8]) -> Result<Vec<PageImage>>;
}

pub trait FieldPositionSource: Send + Sync {
    fn extract_fields(&self, document: &[u8], language_hint: &str) -> Result<FormPositions>;

    fn extract_layout(&self, document: &[u8], language_hint: &str) -> Result<LayoutTree>;
}

pub trait DocumentStructureSource: Send + Sync {
    fn extract_structure(
        &self,
        pages: &[PageImage],
        options: &StructureOptions,
    ) -> Result<StructureBatch>;

    fn extract_signer_fields(
        &self,
        pages: &[PageImage],
        signer_title: &str,
        options: &StructureOptions,
    ) -> Result<Vec<String>>;
}

pub trait VisionOracle: Send + Sync {
    fn annotate(&self, pages: &[PageImage], prompt: &str) -> Result<Vec<FieldPrediction>>;
}

pub trait PromptInterpreter: Send + Sync {
    fn interpret(&self, prompt: &str) -> Result<PromptInfo>;
}
