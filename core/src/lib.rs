pub mod classifier;
pub mod clock;
pub mod error;
pub mod events;
pub mod models;
pub mod orphans;
pub mod popular;
pub mod product_index;
pub mod recovery;
pub mod remote;
pub mod service;
pub mod storage;
pub mod time_model;
pub mod tombstones;

pub use error::{LarderError, Result};
pub use service::{EngineSettings, LarderService};
