/// Multi-root TreeKEM Library
/// Tree-based group key agreement where external nodes such as chatbots each
/// share a separate root with the group, over a plain TreeKEM or an MLS group.

pub mod config;
pub mod crypto;
pub mod error;
pub mod messages;
pub mod mls;
pub mod multi;
pub mod node;
pub mod simulation;
pub mod state;
pub mod tree_math;
pub mod treekem;

pub use error::{Result, TreeKemError};
pub use messages::WireMessage;
pub use multi::{MlsMultiTree, MlsMultiTreeExternal, MultiTreeKem, MultiTreeKemExternal};
pub use node::{Node, NodeMap, Slot};
pub use state::TreeKemState;
