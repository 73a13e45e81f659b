//! MLS integration
//!
//! - `group`: OpenMLS group operations (credentials, adds, commits, welcomes)
//! - `MlsTreeState`: the one thing an MLS-backed multi-root tree needs from
//!   the underlying group

pub mod group;

use openmls::prelude::MlsGroup;

/// Source of the MLS ratchet tree hash. The multi-root tree derives its
/// internal root from this value every time it is asked for it.
pub trait MlsTreeState {
    fn tree_root_hash(&self) -> Vec<u8>;
}

impl MlsTreeState for MlsGroup {
    fn tree_root_hash(&self) -> Vec<u8> {
        self.export_group_context().tree_hash().to_vec()
    }
}
