pub mod pool;

pub use pool::{JobReport, WorkerPool};
