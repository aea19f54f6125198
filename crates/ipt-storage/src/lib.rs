//! ipt-storage: content-node capability (Kubo RPC) + descriptor output operator

pub mod health;
pub mod kubo;
pub mod memory;
pub mod node;
pub mod operator;

pub use health::check_health;
pub use kubo::KuboClient;
pub use memory::{MemoryNode, NodeStats};
pub use node::{BlockStat, ContentNode, GcSummary};
pub use operator::{build_descriptor_operator, memory_operator};
