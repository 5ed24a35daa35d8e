pub mod archive;
pub mod capture;
pub mod config;
pub mod detect;
pub mod error;
pub mod import;
pub mod model;
pub mod normalize;
pub mod parse;
pub mod store;
pub mod topology;

pub use detect::{DetectConfig, UnstableRule, detect_anomalies};
pub use error::{ImportError, TopoError};
pub use import::{ImportOptions, ImportResult, import_log_file};
pub use normalize::normalize;
pub use store::Store;
pub use topology::{Graph, build_topology, mark_link_confidence};
