pub mod loader;
pub mod schema;

pub use loader::{load_config, load_config_from_str};
pub use schema::{
    Config, LocationConfig, LoggingConfig, PlacementConfig, PoliciesConfig, QueueConfig,
    ScanConfig, ScheduleConfig, TemplateConfig,
};
