mod classify;

pub use classify::{build_request, classify, format_output, ClassifyError};
