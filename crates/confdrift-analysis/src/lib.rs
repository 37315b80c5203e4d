mod compute;
mod export;
mod extract;
mod patch;

pub use compute::{DriftComputationError, compute_drift, parse_snapshot};
pub use export::{ExportDocument, ExportError, export_drift};
pub use extract::{
    CanonicalObjectMap, ExtractError, MISSING_DATA_KEY, MissingDataEntry, UNSPECIFIED_REASON,
    extract, extract_missing_data,
};
pub use patch::diff_states;
