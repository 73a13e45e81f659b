//! Per-external-node bookkeeping shared by the plain and MLS-backed multi-root trees.

use crate::crypto::{self, EcKemCiphertext, SECRET_LEN};
use crate::error::{Result, TreeKemError};
use crate::messages::{ExternalNodeJoin, ExternalNodeJoins, ExternalNodeUpdate};
use crate::node::Node;
use std::collections::BTreeMap;
use zeroize::Zeroizing;

/// What a member knows about one external node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalNodeRecord {
    /// The external node's current public keys.
    pub external: Node,
    /// Full shared root between the group and this external node.
    pub root: Node,
    /// Full internal root the external node last synchronized against. Its
    /// public key is the one the external node encrypts to.
    pub last_tree_root: Node,
}

#[derive(Debug, Default)]
pub(crate) struct ExternalNodeRegistry {
    records: BTreeMap<String, ExternalNodeRecord>,
}

fn full_root(root: &Node) -> Result<(&[u8], &[u8])> {
    match (root.secret(), root.private()) {
        (Some(secret), Some(private)) => Ok((secret, private)),
        _ => Err(TreeKemError::ProtocolDesync(
            "internal root is not known to this member".to_string(),
        )),
    }
}

impl ExternalNodeRegistry {
    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&ExternalNodeRecord> {
        self.records.get(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    pub fn roots(&self) -> BTreeMap<String, Node> {
        self.records
            .iter()
            .map(|(id, record)| (id.clone(), record.root.clone()))
            .collect()
    }

    pub fn ensure_known<S: AsRef<str>>(&self, ids: &[S]) -> Result<()> {
        for id in ids {
            let id = id.as_ref();
            if !self.contains(id) {
                return Err(TreeKemError::UnknownEntry(id.to_string()));
            }
        }
        Ok(())
    }

    /// Invite a new external node against `tree_root`. Returns the init leaf
    /// sealed to the root, and the init leaf itself for the external node.
    pub fn join(&mut self, id: &str, tree_root: &Node) -> Result<(EcKemCiphertext, Vec<u8>)> {
        if self.contains(id) {
            return Err(TreeKemError::DuplicateEntry(id.to_string()));
        }
        full_root(tree_root)?;

        let init_leaf = crypto::random_bytes(SECRET_LEN);
        let ciphertext = crypto::eckem_encrypt(&init_leaf, &tree_root.public)?;
        let record = Self::record_from_init_leaf(&init_leaf, tree_root)?;
        self.records.insert(id.to_string(), record);

        log::info!("Invited external node {}", id);
        Ok((ciphertext, init_leaf))
    }

    /// Adopt an external node invited by another member.
    pub fn add(&mut self, id: &str, ciphertext: &EcKemCiphertext, tree_root: &Node) -> Result<()> {
        if self.contains(id) {
            return Err(TreeKemError::DuplicateEntry(id.to_string()));
        }
        let (_, private) = full_root(tree_root)?;
        let init_leaf = Zeroizing::new(crypto::eckem_decrypt(ciphertext, private)?);
        let record = Self::record_from_init_leaf(&init_leaf, tree_root)?;
        self.records.insert(id.to_string(), record);

        log::info!("Added external node {}", id);
        Ok(())
    }

    fn record_from_init_leaf(init_leaf: &[u8], tree_root: &Node) -> Result<ExternalNodeRecord> {
        let external = Node::from_secret(init_leaf)?.to_public();
        let root = Node::from_secret(&crypto::hash(init_leaf))?;
        Ok(ExternalNodeRecord {
            external,
            root,
            last_tree_root: tree_root.clone(),
        })
    }

    /// Re-derive the shared root of every listed external node from
    /// `tree_root`, sealing the new root secret to each external node when
    /// `seal` is set. Nothing changes unless every id is known.
    pub fn refresh<S: AsRef<str>>(
        &mut self,
        ids: &[S],
        tree_root: &Node,
        seal: bool,
    ) -> Result<BTreeMap<String, EcKemCiphertext>> {
        self.ensure_known(ids)?;
        let (secret, _) = full_root(tree_root)?;
        let h = Zeroizing::new(crypto::hash(secret));
        let shared = Node::from_secret(&h)?;

        let mut ciphertexts = BTreeMap::new();
        if seal {
            for id in ids {
                let id = id.as_ref();
                if let Some(record) = self.records.get(id) {
                    ciphertexts.insert(
                        id.to_string(),
                        crypto::eckem_encrypt(&h, &record.external.public)?,
                    );
                }
            }
        }

        for id in ids {
            if let Some(record) = self.records.get_mut(id.as_ref()) {
                record.root = shared.clone();
                record.last_tree_root = tree_root.clone();
            }
        }

        log::debug!("Refreshed {} external roots", ids.len());
        Ok(ciphertexts)
    }

    /// Apply a key rotation sent by external node `id`.
    pub fn handle_external_update(&mut self, id: &str, update: &ExternalNodeUpdate) -> Result<()> {
        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| TreeKemError::UnknownEntry(id.to_string()))?;
        crypto::check_public_key(&update.public)?;

        let h = {
            let private = record.last_tree_root.private().ok_or_else(|| {
                TreeKemError::ProtocolDesync(format!("no pinned root for external node {}", id))
            })?;
            Zeroizing::new(crypto::eckem_decrypt(&update.ciphertext, private).map_err(|e| {
                TreeKemError::ProtocolDesync(format!("update from external node {}: {}", id, e))
            })?)
        };

        record.root = Node::from_secret(&h)?;
        record.external = Node::public_only(update.public.clone(), update.sign_public.clone());

        log::debug!("External node {} rotated its keys", id);
        Ok(())
    }

    /// Seal every record's secrets to `public_key` for a new member.
    pub fn joins_without_update(&self, public_key: &[u8]) -> Result<ExternalNodeJoins> {
        let mut joins = ExternalNodeJoins::default();
        for (id, record) in &self.records {
            let (last_secret, _) = full_root(&record.last_tree_root)?;
            let root_secret = record.root.secret().ok_or_else(|| {
                TreeKemError::ProtocolDesync(format!("root for external node {} is not full", id))
            })?;

            joins.nodes.insert(
                id.clone(),
                ExternalNodeJoin {
                    public: record.external.public.clone(),
                    sign_public: record.external.sign_public.clone(),
                    last_tree_root: crypto::eckem_encrypt(last_secret, public_key)?,
                    root: crypto::eckem_encrypt(root_secret, public_key)?,
                },
            );
        }
        Ok(joins)
    }

    /// Adopt catch-up records sealed to `private_key`. Existing ids are
    /// overwritten; nothing changes if any record fails to open.
    pub fn set_joins_without_update(
        &mut self,
        joins: &ExternalNodeJoins,
        private_key: &[u8],
    ) -> Result<()> {
        let mut records = Vec::with_capacity(joins.nodes.len());
        for (id, join) in &joins.nodes {
            crypto::check_public_key(&join.public)?;
            let last_secret = Zeroizing::new(crypto::eckem_decrypt(&join.last_tree_root, private_key)?);
            let root_secret = Zeroizing::new(crypto::eckem_decrypt(&join.root, private_key)?);
            records.push((
                id.clone(),
                ExternalNodeRecord {
                    external: Node::public_only(join.public.clone(), join.sign_public.clone()),
                    root: Node::from_secret(&root_secret)?,
                    last_tree_root: Node::from_secret(&last_secret)?,
                },
            ));
        }

        let count = records.len();
        self.records.extend(records);

        log::info!("Adopted {} external nodes from catch-up", count);
        Ok(())
    }
}
