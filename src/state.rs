//! Group operations over one member's ratchet tree.
//!
//! Every `handle_*` method decrypts before touching the tree, so a failed
//! message leaves the state exactly as it was.

use crate::crypto::{self, SECRET_LEN};
use crate::error::{Result, TreeKemError};
use crate::messages::{
    GroupAddForGroup, GroupAddForJoiner, GroupInitKey, UserAdd, UserMove, UserRemove, UserUpdate,
};
use crate::node::{Node, NodeMap, Slot};
use crate::treekem::{hash_up, TreeKem};
use zeroize::Zeroizing;

#[derive(Debug, Clone, Default)]
pub struct TreeKemState {
    tkem: TreeKem,
}

impl TreeKemState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index(&self) -> usize {
        self.tkem.index()
    }

    pub fn size(&self) -> usize {
        self.tkem.size()
    }

    pub fn tree(&self) -> &TreeKem {
        &self.tkem
    }

    pub fn nodes(&self) -> &[Slot] {
        self.tkem.slots()
    }

    pub fn trim(&mut self, size: usize) -> Result<()> {
        self.tkem.trim(size)
    }

    /// Public copath of this member's own leaf.
    pub fn copath(&self) -> NodeMap {
        self.tkem.copath(self.index())
    }

    /// Public copath of an arbitrary leaf, as sent with removes and moves.
    pub fn copath_of(&self, index: usize) -> NodeMap {
        self.tkem.copath(index)
    }

    pub fn equal(&self, other: &TreeKemState) -> bool {
        self.tkem.equal(&other.tkem)
    }

    pub fn root_node(&self) -> Option<&Node> {
        self.tkem.root_node()
    }

    pub fn root_secret(&self) -> Option<&[u8]> {
        self.root_node().and_then(Node::secret)
    }

    pub fn root_public(&self) -> Option<&[u8]> {
        self.root_node().map(|node| node.public.as_slice())
    }

    pub fn root_sign_public(&self) -> Option<&[u8]> {
        self.root_node().map(|node| node.sign_public.as_slice())
    }

    pub fn root_private(&self) -> Option<&[u8]> {
        self.root_node().and_then(Node::private)
    }

    pub fn self_node(&self) -> Option<&Node> {
        self.tkem.leaf_node()
    }

    pub fn one_member_group(leaf: &[u8]) -> Result<Self> {
        Ok(Self {
            tkem: TreeKem::one_member_group(leaf)?,
        })
    }

    /// What a prospective member needs to add itself with [`TreeKemState::join`].
    pub fn group_init_key(&self) -> GroupInitKey {
        GroupInitKey {
            size: self.size(),
            frontier: self.tkem.frontier(),
        }
    }

    /// State of a user that added itself from a published init key.
    pub fn from_user_add(leaf: &[u8], gik: &GroupInitKey) -> Result<Self> {
        Ok(Self {
            tkem: TreeKem::from_frontier(gik.size, &gik.frontier, leaf)?,
        })
    }

    /// Self-add: the broadcast the existing members apply with
    /// [`TreeKemState::handle_user_add`].
    pub fn join(leaf: &[u8], gik: &GroupInitKey) -> Result<UserAdd> {
        let tkem = TreeKem::from_frontier(gik.size, &gik.frontier, leaf)?;
        let ct = tkem.encrypt(leaf, tkem.index())?;
        Ok(UserAdd {
            size: tkem.size(),
            ciphertexts: ct.ciphertexts,
            nodes: ct.nodes,
        })
    }

    /// State of a member added by someone else. `init_leaf` is the secret
    /// behind the init public key the adder was given.
    pub fn from_group_add(init_leaf: &[u8], ga: &GroupAddForJoiner) -> Result<Self> {
        let kp = crypto::key_pair_from_secret(init_leaf)?;
        let leaf = Zeroizing::new(crypto::eckem_decrypt(&ga.encrypted_leaf, &kp.private)?);
        Ok(Self {
            tkem: TreeKem::from_frontier(ga.size, &ga.frontier, &leaf)?,
        })
    }

    /// Add the holder of `user_init_public` at the right edge. The local tree
    /// is not touched: the adder applies the group message like everyone else.
    pub fn add(&self, user_init_public: &[u8]) -> Result<(GroupAddForGroup, GroupAddForJoiner)> {
        let leaf = Zeroizing::new(crypto::random_bytes(SECRET_LEN));
        let encrypted_leaf = crypto::eckem_encrypt(&leaf, user_init_public)?;
        let gik = self.group_init_key();
        let ua = Self::join(&leaf, &gik)?;

        log::debug!("Leaf {} adding member at leaf {}", self.index(), gik.size);

        let for_group = GroupAddForGroup {
            size: gik.size,
            ciphertexts: ua.ciphertexts,
            nodes: ua.nodes,
        };
        let for_joiner = GroupAddForJoiner {
            size: gik.size,
            encrypted_leaf,
            frontier: gik.frontier,
        };
        Ok((for_group, for_joiner))
    }

    /// Rotate this member's leaf. The new path is installed immediately.
    pub fn update(&mut self, leaf: &[u8]) -> Result<UserUpdate> {
        let index = self.index();
        let ct = self.tkem.encrypt(leaf, index)?;
        self.tkem.merge(&ct.private_nodes, false)?;

        log::debug!("Leaf {} updated its path", index);

        Ok(UserUpdate {
            from: index,
            ciphertexts: ct.ciphertexts,
            nodes: ct.nodes,
        })
    }

    /// Evict leaf `index` by overwriting its path with a fresh one derived from
    /// `leaf`. `copath` fills any gaps in the local view of the evicted leaf's
    /// copath. The remover applies the result through [`TreeKemState::handle_remove`].
    pub fn remove(&mut self, leaf: &[u8], index: usize, copath: &NodeMap) -> Result<UserRemove> {
        if index >= self.size() {
            return Err(TreeKemError::InvalidIndex(format!(
                "cannot remove leaf {} from a group of {}",
                index,
                self.size()
            )));
        }

        self.tkem.merge(copath, true)?;
        let ct = self.tkem.encrypt(leaf, index)?;

        log::debug!("Leaf {} removing leaf {}", self.index(), index);

        Ok(UserRemove {
            index,
            ciphertexts: ct.ciphertexts,
            copath: self.tkem.copath(index),
        })
    }

    /// Move this member to the empty leaf `to`. The mover applies the result
    /// through [`TreeKemState::handle_self_move`] with the same `leaf`.
    pub fn move_to(&mut self, leaf: &[u8], to: usize, copath: &NodeMap) -> Result<UserMove> {
        if to >= self.size() {
            return Err(TreeKemError::InvalidIndex(format!(
                "cannot move to leaf {} in a group of {}",
                to,
                self.size()
            )));
        }
        if to == self.index() || self.tkem.node(2 * to).is_some() {
            return Err(TreeKemError::InvalidIndex(format!(
                "leaf {} is occupied",
                to
            )));
        }

        self.tkem.merge(copath, true)?;
        let ct = self.tkem.encrypt(leaf, to)?;

        log::debug!("Leaf {} moving to leaf {}", self.index(), to);

        Ok(UserMove {
            from: self.index(),
            to,
            ciphertexts: ct.ciphertexts,
            nodes: ct.nodes,
            copath: self.tkem.copath(to),
        })
    }

    pub fn handle_user_add(&mut self, ua: &UserAdd) -> Result<()> {
        if ua.size != self.size() + 1 {
            return Err(TreeKemError::ProtocolDesync(format!(
                "user add for a group of {} leaves, local group has {}",
                ua.size,
                self.size()
            )));
        }
        self.apply_add(&ua.ciphertexts, &ua.nodes)
    }

    pub fn handle_group_add(&mut self, ga: &GroupAddForGroup) -> Result<()> {
        if ga.size != self.size() {
            return Err(TreeKemError::ProtocolDesync(format!(
                "group add for a group of {} leaves, local group has {}",
                ga.size,
                self.size()
            )));
        }
        self.apply_add(&ga.ciphertexts, &ga.nodes)
    }

    /// Peer-supplied leaf indices must name a leaf of the current tree. Only
    /// adds may address the leaf one past the end.
    fn check_sender(&self, index: usize) -> Result<()> {
        if index >= self.size() {
            return Err(TreeKemError::InvalidIndex(format!(
                "leaf {} outside a group of {}",
                index,
                self.size()
            )));
        }
        Ok(())
    }

    fn apply_add(&mut self, ciphertexts: &[crypto::CiphertextMap], nodes: &NodeMap) -> Result<()> {
        let size = self.size();
        TreeKem::check_positions(nodes, size + 1)?;
        let pt = self.tkem.decrypt(size, ciphertexts)?;

        self.tkem.resize(size + 1);
        self.tkem.merge(nodes, false)?;
        self.tkem.merge(&pt.nodes, false)?;

        log::debug!("Leaf {} applied add of leaf {}", self.index(), size);
        Ok(())
    }

    pub fn handle_update(&mut self, update: &UserUpdate) -> Result<()> {
        self.check_sender(update.from)?;
        TreeKem::check_positions(&update.nodes, self.size())?;

        let pt = self.tkem.decrypt(update.from, &update.ciphertexts)?;
        self.tkem.merge(&update.nodes, false)?;
        self.tkem.merge(&pt.nodes, false)?;

        log::debug!("Leaf {} applied update from leaf {}", self.index(), update.from);
        Ok(())
    }

    /// Also applied by the remover to its own message.
    pub fn handle_remove(&mut self, remove: &UserRemove) -> Result<()> {
        if remove.index == self.index() {
            return Err(TreeKemError::ProtocolDesync(format!(
                "leaf {} was removed from the group",
                remove.index
            )));
        }

        self.check_sender(remove.index)?;
        TreeKem::check_positions(&remove.copath, self.size())?;

        let pt = self.tkem.decrypt(remove.index, &remove.ciphertexts)?;
        self.tkem.remove(remove.index)?;
        self.tkem.merge(&pt.root, false)?;
        self.tkem.merge(&remove.copath, true)?;

        log::debug!("Leaf {} applied removal of leaf {}", self.index(), remove.index);
        Ok(())
    }

    /// Install the mover's own side of a [`UserMove`] produced by
    /// [`TreeKemState::move_to`] with the same `leaf`.
    pub fn handle_self_move(&mut self, mv: &UserMove, leaf: &[u8]) -> Result<()> {
        if mv.from != self.index() {
            return Err(TreeKemError::ProtocolDesync(format!(
                "move from leaf {} is not ours (we are {})",
                mv.from,
                self.index()
            )));
        }

        self.check_move(mv)?;

        let private_nodes = hash_up(2 * mv.to, self.size(), leaf)?;
        self.tkem.remove(mv.from)?;
        self.tkem.merge(&private_nodes, false)?;
        self.tkem.merge(&mv.copath, true)?;
        self.tkem.set_index(mv.to);

        log::debug!("Moved from leaf {} to leaf {}", mv.from, mv.to);
        Ok(())
    }

    fn check_move(&self, mv: &UserMove) -> Result<()> {
        self.check_sender(mv.from)?;
        self.check_sender(mv.to)?;
        if mv.from == mv.to {
            return Err(TreeKemError::InvalidIndex(format!(
                "move from leaf {} to itself",
                mv.from
            )));
        }
        if self.tkem.node(2 * mv.from).is_none() {
            return Err(TreeKemError::ProtocolDesync(format!(
                "move from blank leaf {}",
                mv.from
            )));
        }
        TreeKem::check_positions(&mv.nodes, self.size())?;
        TreeKem::check_positions(&mv.copath, self.size())
    }

    pub fn handle_move(&mut self, mv: &UserMove) -> Result<()> {
        self.check_move(mv)?;

        let pt = self.tkem.decrypt(mv.to, &mv.ciphertexts)?;
        self.tkem.remove(mv.from)?;
        self.tkem.merge(&mv.nodes, false)?;
        self.tkem.merge(&mv.copath, true)?;
        self.tkem.merge(&pt.nodes, false)?;

        log::debug!(
            "Leaf {} applied move of leaf {} to leaf {}",
            self.index(),
            mv.from,
            mv.to
        );
        Ok(())
    }
}
