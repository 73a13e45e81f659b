//! Multi-root TreeKEM
//!
//! Each external node (typically a chatbot) shares its own root with the
//! group, derived from the group's internal root but unknown to every other
//! external node.
//!
//! - `treekem`: multi-root tree over a plain TreeKEM group
//! - `mls`: multi-root tree over an MLS group
//! - `external`: the external node's side of either

mod registry;

pub mod external;
pub mod mls;
pub mod treekem;

pub use external::{MlsMultiTreeExternal, MultiTreeKemExternal};
pub use mls::MlsMultiTree;
pub use registry::ExternalNodeRecord;
pub use treekem::{MultiTreeKem, TreeKemUpdate};
