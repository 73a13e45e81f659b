//! TreeKEM group extended with one extra root per external node.

use crate::crypto::{self, EcKemCiphertext, SECRET_LEN};
use crate::error::{Result, TreeKemError};
use crate::messages::{ExternalNodeJoins, ExternalNodeUpdate, ExternalRootUpdate, UserUpdate};
use crate::multi::registry::{ExternalNodeRecord, ExternalNodeRegistry};
use crate::node::Node;
use crate::state::TreeKemState;
use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::BTreeMap;
use zeroize::Zeroizing;

/// Output of [`MultiTreeKem::update_tree_kem`]: the internal update for the
/// other members and the root refresh for the external nodes.
#[derive(Debug, Clone)]
pub struct TreeKemUpdate {
    pub user_update: UserUpdate,
    pub external: ExternalRootUpdate,
}

struct Inner {
    treekem: TreeKemState,
    registry: ExternalNodeRegistry,
}

/// A member's TreeKEM state plus the shared roots it holds with each
/// external node. Methods take `&self` and serialize through one lock.
pub struct MultiTreeKem {
    inner: RwLock<Inner>,
}

fn current_root(treekem: &TreeKemState) -> Result<Node> {
    treekem
        .root_node()
        .filter(|root| root.is_full())
        .cloned()
        .ok_or_else(|| TreeKemError::ProtocolDesync("internal root is not known".to_string()))
}

impl MultiTreeKem {
    pub fn new(treekem: TreeKemState) -> Self {
        Self {
            inner: RwLock::new(Inner {
                treekem,
                registry: ExternalNodeRegistry::default(),
            }),
        }
    }

    /// Read access to the wrapped group state.
    pub fn tree_kem(&self) -> MappedRwLockReadGuard<'_, TreeKemState> {
        RwLockReadGuard::map(self.inner.read(), |inner| &inner.treekem)
    }

    /// Write access to the wrapped group state, for membership changes that
    /// do not touch the external roots.
    pub fn tree_kem_mut(&self) -> MappedRwLockWriteGuard<'_, TreeKemState> {
        RwLockWriteGuard::map(self.inner.write(), |inner| &mut inner.treekem)
    }

    pub fn into_tree_kem(self) -> TreeKemState {
        self.inner.into_inner().treekem
    }

    /// Invite external node `id` against the current internal root.
    ///
    /// The returned ciphertext goes to the other members; the init leaf goes
    /// to the external node over a separate channel.
    pub fn get_external_node_join(&self, id: &str) -> Result<(EcKemCiphertext, Vec<u8>)> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let root = current_root(&inner.treekem)?;
        inner.registry.join(id, &root)
    }

    /// Adopt external node `id` from an invitation made by another member.
    pub fn add_external_node(&self, id: &str, ciphertext: &EcKemCiphertext) -> Result<()> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let root = current_root(&inner.treekem)?;
        inner.registry.add(id, ciphertext, &root)
    }

    /// Rotate this member's leaf and refresh the roots of the listed external
    /// nodes. Unknown ids fail before anything changes.
    pub fn update_tree_kem<S: AsRef<str>>(&self, ids: &[S]) -> Result<TreeKemUpdate> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        inner.registry.ensure_known(ids)?;

        // The rotation is only kept once every external root is sealed
        let mut treekem = inner.treekem.clone();
        let leaf = Zeroizing::new(crypto::random_bytes(SECRET_LEN));
        let user_update = treekem.update(&leaf)?;
        let root = current_root(&treekem)?;
        let ciphertexts = inner.registry.refresh(ids, &root, true)?;
        inner.treekem = treekem;

        log::info!(
            "Leaf {} updated and refreshed {} external roots",
            inner.treekem.index(),
            ciphertexts.len()
        );

        Ok(TreeKemUpdate {
            user_update,
            external: ExternalRootUpdate {
                ciphertexts,
                root_public: root.public.clone(),
                root_sign_public: root.sign_public.clone(),
            },
        })
    }

    /// Apply another member's [`MultiTreeKem::update_tree_kem`]. `ids` must
    /// match the list the sender refreshed.
    pub fn handle_tree_kem_update<S: AsRef<str>>(&self, update: &UserUpdate, ids: &[S]) -> Result<()> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        inner.registry.ensure_known(ids)?;

        let mut treekem = inner.treekem.clone();
        treekem.handle_update(update)?;
        let root = current_root(&treekem)?;
        inner.registry.refresh(ids, &root, false)?;
        inner.treekem = treekem;
        Ok(())
    }

    pub fn handle_external_node_update(&self, id: &str, update: &ExternalNodeUpdate) -> Result<()> {
        self.inner.write().registry.handle_external_update(id, update)
    }

    /// Catch-up for a member that joined after the external nodes, sealed to
    /// that member's leaf public key.
    pub fn get_external_node_joins_without_update(&self, public_key: &[u8]) -> Result<ExternalNodeJoins> {
        self.inner.read().registry.joins_without_update(public_key)
    }

    /// Adopt a catch-up sealed to this member's leaf key.
    pub fn set_external_node_joins_without_update(&self, joins: &ExternalNodeJoins) -> Result<()> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let private = inner
            .treekem
            .self_node()
            .and_then(Node::private)
            .map(<[u8]>::to_vec)
            .map(Zeroizing::new)
            .ok_or_else(|| TreeKemError::ProtocolDesync("own leaf is not populated".to_string()))?;
        inner.registry.set_joins_without_update(joins, &private)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().registry.contains(id)
    }

    pub fn external_ids(&self) -> Vec<String> {
        self.inner.read().registry.ids()
    }

    pub fn external_node(&self, id: &str) -> Option<ExternalNodeRecord> {
        self.inner.read().registry.get(id).cloned()
    }

    pub fn roots(&self) -> BTreeMap<String, Node> {
        self.inner.read().registry.roots()
    }

    pub fn root_secret(&self, id: &str) -> Option<Vec<u8>> {
        self.inner
            .read()
            .registry
            .get(id)
            .and_then(|record| record.root.secret().map(<[u8]>::to_vec))
    }

    pub fn root_public(&self, id: &str) -> Option<Vec<u8>> {
        self.inner.read().registry.get(id).map(|record| record.root.public.clone())
    }

    pub fn root_sign_public(&self, id: &str) -> Option<Vec<u8>> {
        self.inner
            .read()
            .registry
            .get(id)
            .map(|record| record.root.sign_public.clone())
    }
}

impl std::fmt::Debug for MultiTreeKem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("MultiTreeKem")
            .field("index", &inner.treekem.index())
            .field("size", &inner.treekem.size())
            .field("external", &inner.registry.ids())
            .finish()
    }
}
