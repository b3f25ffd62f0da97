pub mod config;
pub mod context;
pub mod operations;
pub mod outcome;
pub mod runner;

pub use config::PipelineConfig;
pub use context::{PipelineContext, PipelineContextBuilder};
pub use operations::{delete_cloud_provider, delete_location, delete_placement_file};
pub use outcome::{JobOutcome, Outcome};
pub use runner::Pipeline;
