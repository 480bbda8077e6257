//! One-page (occasionally longer) PDF summary of the newest upload.
//!
//! Rendering is split in two: [`ReportLayout`] positions every string and
//! table row, and the encoder turns that layout into PDF bytes. The same
//! summary always yields the same bytes.

mod fonts;
mod layout;
mod pdf;

use equipment_contracts::UploadSummary;

pub use layout::{
    DISTRIBUTION_HEADING, Element, PAGE_HEIGHT, PAGE_WIDTH, PageLayout, ReportLayout, RowKind,
    TABLE_HEADER, TITLE,
};

pub const CONTENT_TYPE: &str = "application/pdf";
pub const ATTACHMENT_FILENAME: &str = "equipment_report.pdf";

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("No uploads found")]
    NoData,
    #[error("failed to encode report: {0}")]
    Encode(String),
}

/// Render the newest stored summary, or fail with `NoData` when there is none.
pub fn render(latest: Option<&UploadSummary>) -> Result<Vec<u8>, ReportError> {
    let summary = latest.ok_or(ReportError::NoData)?;
    render_summary(summary)
}

pub fn render_summary(summary: &UploadSummary) -> Result<Vec<u8>, ReportError> {
    pdf::encode(&ReportLayout::from_summary(summary))
}

pub fn content_disposition() -> String {
    format!("attachment; filename=\"{}\"", ATTACHMENT_FILENAME)
}
