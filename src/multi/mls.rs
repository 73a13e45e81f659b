//! Multi-root extension on top of an MLS group.
//!
//! The internal root is never stored: it is derived from the MLS ratchet tree
//! hash each time it is needed, so it advances with every merged commit.
//! Callers must not hold the state's write guard while calling in here.

use crate::crypto::{self, EcKemCiphertext, KeyPair};
use crate::error::Result;
use crate::messages::{ExternalNodeJoins, ExternalNodeUpdate, ExternalRootUpdate};
use crate::mls::MlsTreeState;
use crate::multi::registry::{ExternalNodeRecord, ExternalNodeRegistry};
use crate::node::Node;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct MlsMultiTree<S> {
    state: Arc<RwLock<S>>,
    registry: RwLock<ExternalNodeRegistry>,
    self_keys: KeyPair,
}

impl<S: MlsTreeState> MlsMultiTree<S> {
    /// `self_secret` seeds the key pair other members seal catch-up records to.
    pub fn new(state: Arc<RwLock<S>>, self_secret: &[u8]) -> Result<Self> {
        Ok(Self {
            state,
            registry: RwLock::new(ExternalNodeRegistry::default()),
            self_keys: crypto::key_pair_from_secret(self_secret)?,
        })
    }

    pub fn state(&self) -> &Arc<RwLock<S>> {
        &self.state
    }

    pub fn self_public(&self) -> &[u8] {
        &self.self_keys.public
    }

    /// Internal root derived from the current MLS tree hash.
    pub fn tree_root(&self) -> Result<Node> {
        let hash = self.state.read().tree_root_hash();
        Node::from_secret(&hash)
    }

    pub fn get_external_node_join(&self, id: &str) -> Result<(EcKemCiphertext, Vec<u8>)> {
        let mut registry = self.registry.write();
        let root = self.tree_root()?;
        registry.join(id, &root)
    }

    pub fn add_external_node(&self, id: &str, ciphertext: &EcKemCiphertext) -> Result<()> {
        let mut registry = self.registry.write();
        let root = self.tree_root()?;
        registry.add(id, ciphertext, &root)
    }

    /// Refresh the listed external roots after the local member merged a
    /// commit. Unknown ids fail before anything changes.
    pub fn update_tree_kem<I: AsRef<str>>(&self, ids: &[I]) -> Result<ExternalRootUpdate> {
        let mut registry = self.registry.write();
        let root = self.tree_root()?;
        let ciphertexts = registry.refresh(ids, &root, true)?;

        log::info!("Refreshed {} external roots from MLS tree hash", ciphertexts.len());

        Ok(ExternalRootUpdate {
            ciphertexts,
            root_public: root.public.clone(),
            root_sign_public: root.sign_public.clone(),
        })
    }

    /// Same refresh on a member that merged someone else's commit.
    pub fn handle_tree_kem_update<I: AsRef<str>>(&self, ids: &[I]) -> Result<()> {
        let mut registry = self.registry.write();
        let root = self.tree_root()?;
        registry.refresh(ids, &root, false)?;
        Ok(())
    }

    pub fn handle_external_node_update(&self, id: &str, update: &ExternalNodeUpdate) -> Result<()> {
        self.registry.write().handle_external_update(id, update)
    }

    /// Catch-up for a member that joined after the external nodes, sealed to
    /// that member's [`MlsMultiTree::self_public`].
    pub fn get_external_node_joins_without_update(&self, public_key: &[u8]) -> Result<ExternalNodeJoins> {
        self.registry.read().joins_without_update(public_key)
    }

    pub fn set_external_node_joins_without_update(&self, joins: &ExternalNodeJoins) -> Result<()> {
        self.registry
            .write()
            .set_joins_without_update(joins, &self.self_keys.private)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.registry.read().contains(id)
    }

    pub fn external_ids(&self) -> Vec<String> {
        self.registry.read().ids()
    }

    pub fn external_node(&self, id: &str) -> Option<ExternalNodeRecord> {
        self.registry.read().get(id).cloned()
    }

    pub fn roots(&self) -> BTreeMap<String, Node> {
        self.registry.read().roots()
    }

    pub fn root_secret(&self, id: &str) -> Option<Vec<u8>> {
        self.registry
            .read()
            .get(id)
            .and_then(|record| record.root.secret().map(<[u8]>::to_vec))
    }

    pub fn root_public(&self, id: &str) -> Option<Vec<u8>> {
        self.registry.read().get(id).map(|record| record.root.public.clone())
    }

    pub fn root_sign_public(&self, id: &str) -> Option<Vec<u8>> {
        self.registry
            .read()
            .get(id)
            .map(|record| record.root.sign_public.clone())
    }
}

impl<S> std::fmt::Debug for MlsMultiTree<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MlsMultiTree")
            .field("self_keys", &self.self_keys)
            .field("external", &self.registry.read().ids())
            .finish_non_exhaustive()
    }
}
