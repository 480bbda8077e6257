//! Upload ingestion: tabular validation followed by aggregation into a
//! [`SummaryStats`]. Everything here is synchronous and free of shared state,
//! so callers may run it on any thread.

use std::io::Read;

use equipment_contracts::SummaryStats;

mod aggregate;
mod validate;

pub use aggregate::aggregate;
pub use validate::{ACCEPTED_EXTENSION, MAX_UPLOAD_BYTES, ValidationError, validate_upload};

/// Validate an upload and aggregate its rows. Either every row is accepted
/// and summarised or the whole upload is rejected.
pub fn summarize_upload<R: Read>(
    name: &str,
    declared_size: u64,
    reader: R,
) -> Result<SummaryStats, ValidationError> {
    let rows = validate_upload(name, declared_size, reader)?;
    aggregate(&rows)
}
