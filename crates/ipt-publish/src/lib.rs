//! ipt-publish: incremental publication engine
//!
//! archive entries -> snapshot root on the content node -> stable name
//! -> TileJSON descriptor

pub mod builder;
pub mod controller;
pub mod delete;
pub mod descriptor;
pub mod namer;
pub mod tree;

pub use builder::{BuildMode, BuildOutcome, BuildStats, ProgressFn, SnapshotBuilder};
pub use controller::{Flow, PublishOptions, PublishReport, Publisher, Stage};
pub use delete::DeleteReport;
pub use descriptor::{DescriptorOverrides, TileJson};
pub use namer::{key_name, tileset_id, Namer, KEY_PREFIX};
pub use tree::DirectoryTree;
