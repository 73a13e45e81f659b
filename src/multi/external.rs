//! The external node's side: a participant (typically a chatbot) that is not
//! in the tree but shares one root with the group.

use crate::crypto::{self, EcKemCiphertext, SECRET_LEN};
use crate::error::{Result, TreeKemError};
use crate::messages::{ExternalNodeUpdate, ExternalRootUpdate};
use crate::node::Node;
use zeroize::Zeroizing;

#[derive(Debug, Clone)]
pub struct MultiTreeKemExternal {
    /// Public keys of the internal root last synchronized against.
    tree_root: Node,
    /// This node's own key pair, derived from its current leaf secret.
    self_node: Node,
    /// Full shared root.
    root: Node,
}

/// The MLS-backed group derives its internal root differently, but the
/// external side is the same.
pub type MlsMultiTreeExternal = MultiTreeKemExternal;

impl MultiTreeKemExternal {
    /// Set up from an invitation: the inviting member's root public keys and
    /// the init leaf it handed over.
    pub fn new(tree_root_public: &[u8], tree_root_sign_public: &[u8], init_leaf: &[u8]) -> Result<Self> {
        Ok(Self {
            tree_root: Node::public_only(tree_root_public.to_vec(), tree_root_sign_public.to_vec()),
            self_node: Node::from_secret(init_leaf)?,
            root: Node::from_secret(&crypto::hash(init_leaf))?,
        })
    }

    /// Rotate this node's leaf. The new shared root is installed immediately.
    pub fn update_external_node(&mut self) -> Result<ExternalNodeUpdate> {
        let leaf = Zeroizing::new(crypto::random_bytes(SECRET_LEN));
        let h = Zeroizing::new(crypto::hash(&leaf));
        let ciphertext = crypto::eckem_encrypt(&h, &self.tree_root.public)?;

        self.self_node = Node::from_secret(&leaf)?;
        self.root = Node::from_secret(&h)?;

        log::debug!("External node rotated to {}", crypto::fingerprint(&self.self_node.public));

        Ok(ExternalNodeUpdate {
            ciphertext,
            public: self.self_node.public.clone(),
            sign_public: self.self_node.sign_public.clone(),
        })
    }

    /// Apply a root refresh sealed to this node's current key.
    pub fn handle_tree_kem_update(
        &mut self,
        ciphertext: &EcKemCiphertext,
        tree_root_public: &[u8],
        tree_root_sign_public: &[u8],
    ) -> Result<()> {
        let private = self.self_node.private().ok_or_else(|| {
            TreeKemError::ProtocolDesync("external node has no private key".to_string())
        })?;
        let h = Zeroizing::new(crypto::eckem_decrypt(ciphertext, private).map_err(|e| {
            TreeKemError::ProtocolDesync(format!("root refresh: {}", e))
        })?);

        self.root = Node::from_secret(&h)?;
        self.tree_root = Node::public_only(tree_root_public.to_vec(), tree_root_sign_public.to_vec());
        Ok(())
    }

    /// Pick this node's entry out of a broadcast [`ExternalRootUpdate`].
    pub fn handle_root_update(&mut self, id: &str, update: &ExternalRootUpdate) -> Result<()> {
        let ciphertext = update
            .ciphertexts
            .get(id)
            .ok_or_else(|| TreeKemError::UnknownEntry(id.to_string()))?;
        self.handle_tree_kem_update(ciphertext, &update.root_public, &update.root_sign_public)
    }

    /// Pin the internal root derived from an MLS tree hash.
    pub fn update_root_from_hash(&mut self, tree_hash: &[u8]) -> Result<()> {
        self.tree_root = Node::from_secret(tree_hash)?.to_public();
        Ok(())
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn root_secret(&self) -> &[u8] {
        self.root.secret().unwrap_or_default()
    }

    pub fn root_public(&self) -> &[u8] {
        &self.root.public
    }

    pub fn root_sign_public(&self) -> &[u8] {
        &self.root.sign_public
    }

    pub fn self_node(&self) -> &Node {
        &self.self_node
    }

    pub fn tree_root(&self) -> &Node {
        &self.tree_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invited() -> (MultiTreeKemExternal, Node, Vec<u8>) {
        let internal = Node::from_secret(&crypto::random_bytes(SECRET_LEN)).unwrap();
        let init_leaf = crypto::random_bytes(SECRET_LEN);
        let external = MultiTreeKemExternal::new(&internal.public, &internal.sign_public, &init_leaf).unwrap();
        (external, internal, init_leaf)
    }

    #[test]
    fn test_new_derives_root_from_init_leaf() {
        let (external, _, init_leaf) = invited();
        assert_eq!(external.root_secret(), crypto::hash(&init_leaf).as_slice());
        assert_eq!(
            external.self_node().public,
            Node::from_secret(&init_leaf).unwrap().public
        );
    }

    #[test]
    fn test_update_is_readable_by_internal_root() {
        let (mut external, internal, _) = invited();
        let update = external.update_external_node().unwrap();

        let h = crypto::eckem_decrypt(&update.ciphertext, internal.private().unwrap()).unwrap();
        assert_eq!(h, external.root_secret());
        assert_eq!(update.public, external.self_node().public);
    }

    #[test]
    fn test_refresh_to_stale_key_is_desync() {
        let (mut external, _, _) = invited();
        let stale_public = external.self_node().public.clone();
        external.update_external_node().unwrap();

        let ciphertext = crypto::eckem_encrypt(b"new root", &stale_public).unwrap();
        let err = external
            .handle_tree_kem_update(&ciphertext, &[], &[])
            .unwrap_err();
        assert!(err.is_desync());
    }

    #[test]
    fn test_root_update_for_missing_id() {
        let (mut external, internal, _) = invited();
        let update = ExternalRootUpdate {
            ciphertexts: Default::default(),
            root_public: internal.public.clone(),
            root_sign_public: internal.sign_public.clone(),
        };
        assert!(matches!(
            external.handle_root_update("cb-0", &update),
            Err(TreeKemError::UnknownEntry(_))
        ));
    }
}
