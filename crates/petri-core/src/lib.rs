pub mod bucket;
pub mod cell;
pub mod config;
pub mod error;

pub use bucket::{BucketKey, BucketMap};
pub use cell::{Cell, Position};
pub use config::{MasterConfig, SeedConfig, SeedSource};
pub use error::CoreError;
