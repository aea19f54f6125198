pub mod config;
pub mod error;
pub mod types;

pub use error::{IptError, IptResult};
pub use types::{Cid, NamingKey, TileEntry, TileInfo, TileKey, INFO_ENTRY_PATH};
