mod downstream;
mod preprocess;
mod relay;
mod server;

pub mod config;

pub use downstream::{Downstream, DownstreamError, GrpcDownstream};
pub use relay::{InferenceBackend, PreprocessingRelay};
pub use server::start_server;
