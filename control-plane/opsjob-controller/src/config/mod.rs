mod types;

pub use types::{FeaturesConfig, OpsJobConfig};
