//! Ratchet tree: slot storage plus the path-secret encryption and decryption
//! that every group operation is built from.
//!
//! A path secret `h` installed at a leaf ratchets upward: each ancestor up to
//! the root receives `Node::from_secret(h)` and then `h = SHA-256(h)`. The
//! sender seals the secret of every parent on its direct path to the highest
//! populated heads of the matching copath subtree, so every other member can
//! open exactly one ciphertext and re-derive everything above it.

use crate::crypto::{self, CiphertextMap};
use crate::error::{Result, TreeKemError};
use crate::node::{Node, NodeMap, Slot};
use crate::tree_math;
use zeroize::Zeroizing;

/// Output of [`TreeKem::encrypt`].
#[derive(Debug, Clone)]
pub struct TreeKemCiphertext {
    /// Leaf index the path was installed at.
    pub index: usize,
    /// Public projections of the new path, safe to broadcast.
    pub nodes: NodeMap,
    /// Full nodes of the new path, kept by the sender.
    pub private_nodes: NodeMap,
    /// One map per copath node, in copath order.
    pub ciphertexts: Vec<CiphertextMap>,
}

/// Output of [`TreeKem::decrypt`].
#[derive(Debug, Clone)]
pub struct DecryptionResult {
    /// Just the root entry of `nodes`.
    pub root: NodeMap,
    /// Full nodes from the lowest shared ancestor up to the root.
    pub nodes: NodeMap,
}

/// Ratchet a path secret from `start` up to the root of a tree with `size` leaves.
pub fn hash_up(start: usize, size: usize, secret: &[u8]) -> Result<NodeMap> {
    if start >= tree_math::node_width(size) {
        return Err(TreeKemError::InvalidIndex(format!(
            "node {} outside tree of {} leaves",
            start, size
        )));
    }

    let root = tree_math::root(size);
    let mut nodes = NodeMap::new();
    let mut position = start;
    let mut h = Zeroizing::new(secret.to_vec());

    loop {
        nodes.insert(position, Node::from_secret(&h)?);
        if position == root {
            break;
        }
        position = tree_math::parent(position, size);
        h = Zeroizing::new(crypto::hash(&h));
    }

    Ok(nodes)
}

fn desync(msg: impl Into<String>) -> TreeKemError {
    TreeKemError::ProtocolDesync(msg.into())
}

/// One member's view of the ratchet tree.
#[derive(Debug, Clone, Default)]
pub struct TreeKem {
    size: usize,
    index: usize,
    slots: Vec<Slot>,
}

impl TreeKem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-member tree seeded from `leaf`.
    pub fn one_member_group(leaf: &[u8]) -> Result<Self> {
        let mut tree = Self::new();
        tree.resize(1);
        tree.merge(&hash_up(0, 1, leaf)?, false)?;
        Ok(tree)
    }

    /// Tree for a member joining at the right edge of a group of `size`
    /// leaves, given that group's frontier.
    pub fn from_frontier(size: usize, frontier: &NodeMap, leaf: &[u8]) -> Result<Self> {
        let mut tree = Self::new();
        tree.resize(size + 1);
        tree.index = size;
        tree.merge(frontier, false)?;
        tree.merge(&hash_up(2 * size, size + 1, leaf)?, false)?;
        Ok(tree)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn set_index(&mut self, index: usize) {
        self.index = index;
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn node(&self, position: usize) -> Option<&Node> {
        self.slots.get(position).and_then(Slot::node)
    }

    pub fn root_node(&self) -> Option<&Node> {
        if self.size == 0 {
            return None;
        }
        self.node(tree_math::root(self.size))
    }

    /// The node at this member's own leaf.
    pub fn leaf_node(&self) -> Option<&Node> {
        self.node(2 * self.index)
    }

    /// Change the leaf count, growing with blank slots or truncating.
    pub(crate) fn resize(&mut self, size: usize) {
        self.size = size;
        let width = tree_math::node_width(size);
        if self.slots.len() != width {
            self.slots.resize(width, Slot::Blank);
        }
    }

    /// Shrink the tree to `size` leaves, discarding slots beyond the new width.
    pub fn trim(&mut self, size: usize) -> Result<()> {
        if size > self.size {
            return Err(TreeKemError::InvalidIndex(format!(
                "cannot trim a tree of {} leaves up to {}",
                self.size, size
            )));
        }
        if size <= self.index {
            return Err(TreeKemError::InvalidIndex(format!(
                "trimming to {} leaves would drop own leaf {}",
                size, self.index
            )));
        }
        self.resize(size);
        Ok(())
    }

    /// Blank every slot on the direct path of leaf `index`.
    pub fn remove(&mut self, index: usize) -> Result<()> {
        if index >= self.size {
            return Err(TreeKemError::InvalidIndex(format!(
                "leaf {} outside tree of {} leaves",
                index, self.size
            )));
        }
        for position in tree_math::dirpath(2 * index, self.size) {
            self.slots[position] = Slot::Blank;
        }
        Ok(())
    }

    /// Fails if any position in `nodes` lies outside a tree of `size` leaves.
    pub fn check_positions(nodes: &NodeMap, size: usize) -> Result<()> {
        let width = tree_math::node_width(size);
        match nodes.keys().find(|&&position| position >= width) {
            Some(position) => Err(TreeKemError::InvalidIndex(format!(
                "node {} outside tree of {} leaves",
                position, size
            ))),
            None => Ok(()),
        }
    }

    /// Install `nodes`. With `preserve` set, slots that are already populated
    /// are left untouched. Nothing is installed if any position is out of range.
    pub fn merge(&mut self, nodes: &NodeMap, preserve: bool) -> Result<()> {
        Self::check_positions(nodes, self.size)?;
        for (&position, node) in nodes {
            if preserve && !self.slots[position].is_blank() {
                continue;
            }
            self.slots[position] = Slot::Populated(node.clone());
        }
        Ok(())
    }

    /// Public projections of the populated heads below `head`: the head itself
    /// if populated, otherwise the populated heads of its children.
    pub fn gather_subtree(&self, head: usize) -> NodeMap {
        let mut nodes = NodeMap::new();
        self.collect_subtree(head, &mut nodes);
        nodes
    }

    fn collect_subtree(&self, head: usize, nodes: &mut NodeMap) {
        if let Some(node) = self.node(head) {
            nodes.insert(head, node.to_public());
            return;
        }
        if head >= tree_math::node_width(self.size) {
            return;
        }

        let left = tree_math::left(head);
        if left != head {
            self.collect_subtree(left, nodes);
        }
        let right = tree_math::right(head, self.size);
        if right != head {
            self.collect_subtree(right, nodes);
        }
    }

    /// Public nodes a newcomer needs to build its own view of the tree.
    pub fn frontier(&self) -> NodeMap {
        tree_math::frontier(self.size)
            .into_iter()
            .flat_map(|head| self.gather_subtree(head))
            .collect()
    }

    /// Public copath nodes of leaf `index`, resolved through blank heads.
    pub fn copath(&self, index: usize) -> NodeMap {
        tree_math::copath(2 * index, self.size)
            .into_iter()
            .flat_map(|c| self.gather_subtree(c))
            .collect()
    }

    /// Seal `value` to the highest populated nodes of the subtree under `head`.
    pub fn encrypt_to_subtree(&self, head: usize, value: &[u8]) -> Result<CiphertextMap> {
        let mut encryptions = CiphertextMap::new();
        for (position, node) in self.gather_subtree(head) {
            encryptions.insert(position, crypto::eckem_encrypt(value, &node.public)?);
        }
        Ok(encryptions)
    }

    /// Install-ready path for `leaf` at leaf index `except`, plus one
    /// ciphertext set per copath node.
    pub fn encrypt(&self, leaf: &[u8], except: usize) -> Result<TreeKemCiphertext> {
        if except >= self.size {
            return Err(TreeKemError::InvalidIndex(format!(
                "leaf {} outside tree of {} leaves",
                except, self.size
            )));
        }

        let position = 2 * except;
        let private_nodes = hash_up(position, self.size, leaf)?;
        let nodes = private_nodes
            .iter()
            .map(|(&k, node)| (k, node.to_public()))
            .collect();

        let copath = tree_math::copath(position, self.size);
        let mut ciphertexts = Vec::with_capacity(copath.len());
        for c in copath {
            let parent = tree_math::parent(c, self.size);
            let secret = private_nodes
                .get(&parent)
                .and_then(Node::secret)
                .ok_or_else(|| desync(format!("no path secret at node {}", parent)))?;
            ciphertexts.push(self.encrypt_to_subtree(c, secret)?);
        }

        log::debug!(
            "Encrypted path for leaf {} to {} copath subtrees",
            except,
            ciphertexts.len()
        );

        Ok(TreeKemCiphertext {
            index: except,
            nodes,
            private_nodes,
            ciphertexts,
        })
    }

    /// Open the path secret sent by leaf `index`. An `index` equal to the
    /// current size is a joiner whose tree is one leaf larger.
    pub fn decrypt(&self, index: usize, ciphertexts: &[CiphertextMap]) -> Result<DecryptionResult> {
        if self.size == 0 {
            return Err(desync("empty tree"));
        }

        let sender_size = if index == self.size {
            self.size + 1
        } else {
            self.size
        };
        if index >= sender_size {
            return Err(desync(format!(
                "sender {} outside tree of {} leaves",
                index, self.size
            )));
        }

        let copath = tree_math::copath(2 * index, sender_size);
        let mut dirpath = tree_math::dirpath(2 * self.index, self.size);
        dirpath.push(tree_math::root(self.size));

        let (dir_index, co_index) = dirpath
            .iter()
            .enumerate()
            .find_map(|(i, d)| copath.iter().position(|c| c == d).map(|j| (i, j)))
            .ok_or_else(|| desync(format!("no copath intersection with sender {}", index)))?;

        let encryptions = ciphertexts
            .get(co_index)
            .ok_or_else(|| desync(format!("missing ciphertexts for copath node {}", co_index)))?;

        let (position, ciphertext) = dirpath
            .iter()
            .find_map(|d| encryptions.get(d).map(|ct| (*d, ct)))
            .ok_or_else(|| desync("no ciphertext addressed to our direct path"))?;

        let private = self
            .node(position)
            .and_then(Node::private)
            .ok_or_else(|| desync(format!("no private key at node {}", position)))?;

        let h = Zeroizing::new(
            crypto::eckem_decrypt(ciphertext, private)
                .map_err(|e| desync(format!("path secret for node {}: {}", position, e)))?,
        );

        let root = tree_math::root(sender_size);
        let mut new_dirpath = tree_math::dirpath(2 * self.index, sender_size);
        new_dirpath.push(root);

        let start = *new_dirpath
            .get(dir_index + 1)
            .ok_or_else(|| desync("shared ancestor above the root"))?;
        let nodes = hash_up(start, sender_size, &h)?;
        let root_node = nodes
            .get(&root)
            .cloned()
            .ok_or_else(|| desync("ratchet did not reach the root"))?;

        log::debug!(
            "Leaf {} decrypted path from leaf {} at node {}",
            self.index,
            index,
            position
        );

        Ok(DecryptionResult {
            root: NodeMap::from([(root, root_node)]),
            nodes,
        })
    }

    /// Whether two views agree on every position both of them populate.
    pub fn equal(&self, other: &TreeKem) -> bool {
        if self.size != other.size {
            return false;
        }
        self.slots
            .iter()
            .zip(other.slots.iter())
            .all(|(a, b)| match (a.node(), b.node()) {
                (Some(a), Some(b)) => a.public == b.public && a.sign_public == b.sign_public,
                _ => true,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{random_bytes, SECRET_LEN};

    /// Build `n` views of one fully populated tree: every member holds the
    /// full nodes on its own direct path and public projections elsewhere.
    fn test_members(n: usize) -> Vec<TreeKem> {
        let full: NodeMap = (0..tree_math::node_width(n))
            .map(|k| (k, Node::from_secret(&random_bytes(SECRET_LEN)).unwrap()))
            .collect();
        let public: NodeMap = full.iter().map(|(&k, node)| (k, node.to_public())).collect();

        (0..n)
            .map(|i| {
                let mut tree = TreeKem::new();
                tree.resize(n);
                tree.index = i;
                tree.merge(&public, false).unwrap();

                let mut path = tree_math::dirpath(2 * i, n);
                path.push(tree_math::root(n));
                let own: NodeMap = path.into_iter().map(|k| (k, full[&k].clone())).collect();
                tree.merge(&own, false).unwrap();
                tree
            })
            .collect()
    }

    #[test]
    fn test_hash_up_ratchets_by_sha256() {
        let secret = b"path secret";
        let nodes = hash_up(0, 4, secret).unwrap();

        assert_eq!(nodes.keys().copied().collect::<Vec<_>>(), vec![0, 1, 3]);
        assert_eq!(nodes[&0].secret(), Some(&secret[..]));
        assert_eq!(nodes[&1].secret().unwrap(), crypto::hash(secret).as_slice());
        assert_eq!(
            nodes[&3].secret().unwrap(),
            crypto::hash(&crypto::hash(secret)).as_slice()
        );
    }

    #[test]
    fn test_hash_up_rejects_out_of_range_start() {
        assert!(matches!(
            hash_up(8, 4, b"x"),
            Err(TreeKemError::InvalidIndex(_))
        ));
    }

    #[test]
    fn test_one_member_group() {
        let tree = TreeKem::one_member_group(b"leaf").unwrap();
        assert_eq!(tree.size(), 1);
        assert_eq!(tree.index(), 0);
        assert!(tree.root_node().unwrap().is_full());
    }

    #[test]
    fn test_gather_subtree_routes_around_blanks() {
        let mut members = test_members(4);
        let tree = &mut members[0];
        tree.remove(1).unwrap();

        let gathered = tree.gather_subtree(1);
        assert_eq!(gathered.keys().copied().collect::<Vec<_>>(), vec![0]);
        assert!(gathered.values().all(|n| !n.is_full()));

        assert_eq!(tree.gather_subtree(5).keys().copied().collect::<Vec<_>>(), vec![5]);
    }

    #[test]
    fn test_frontier_is_public_only() {
        let tree = TreeKem::one_member_group(b"leaf").unwrap();
        let frontier = tree.frontier();
        assert_eq!(frontier.len(), 1);
        assert!(frontier.values().all(|n| !n.is_full()));
    }

    #[test]
    fn test_encrypt_decrypt_every_size() {
        for n in 1..=16 {
            let members = test_members(n);
            for sender in 0..n {
                let leaf = random_bytes(SECRET_LEN);
                let ct = members[sender].encrypt(&leaf, sender).unwrap();
                let root = tree_math::root(n);
                let expected = ct.private_nodes[&root].secret().unwrap().to_vec();

                for (i, member) in members.iter().enumerate() {
                    if i == sender {
                        continue;
                    }
                    let pt = member.decrypt(sender, &ct.ciphertexts).unwrap();
                    assert_eq!(
                        pt.root[&root].secret().unwrap(),
                        expected.as_slice(),
                        "n={} sender={} receiver={}",
                        n,
                        sender,
                        i
                    );
                    for (k, node) in &pt.nodes {
                        assert_eq!(node.public, ct.nodes[k].public);
                    }
                }
            }
        }
    }

    #[test]
    fn test_decrypt_own_message_is_desync() {
        let members = test_members(4);
        let ct = members[1].encrypt(b"leaf", 1).unwrap();
        let err = members[1].decrypt(1, &ct.ciphertexts).unwrap_err();
        assert!(err.is_desync());
    }

    #[test]
    fn test_decrypt_with_missing_level_is_desync() {
        let members = test_members(4);
        let ct = members[0].encrypt(b"leaf", 0).unwrap();
        let err = members[3].decrypt(0, &ct.ciphertexts[..1]).unwrap_err();
        assert!(err.is_desync());
    }

    #[test]
    fn test_merge_preserve() {
        let mut tree = TreeKem::one_member_group(b"leaf").unwrap();
        let original = tree.node(0).cloned().unwrap();
        let replacement = Node::from_secret(b"other").unwrap();

        tree.merge(&NodeMap::from([(0, replacement.clone())]), true).unwrap();
        assert_eq!(tree.node(0), Some(&original));

        tree.merge(&NodeMap::from([(0, replacement.clone())]), false).unwrap();
        assert_eq!(tree.node(0), Some(&replacement));
    }

    #[test]
    fn test_merge_rejects_positions_outside_the_tree() {
        let mut members = test_members(3);
        let tree = &mut members[0];
        let before = tree.clone();

        let node = Node::from_secret(b"stray").unwrap();
        let nodes = NodeMap::from([(1, node.to_public()), (usize::MAX, node.clone())]);
        assert!(matches!(
            tree.merge(&nodes, false),
            Err(TreeKemError::InvalidIndex(_))
        ));
        assert!(matches!(
            tree.merge(&NodeMap::from([(5, node)]), false),
            Err(TreeKemError::InvalidIndex(_))
        ));
        assert_eq!(tree.slots(), before.slots());
    }

    #[test]
    fn test_remove_rejects_leaf_outside_the_tree() {
        let mut members = test_members(2);
        assert!(matches!(
            members[0].remove(2),
            Err(TreeKemError::InvalidIndex(_))
        ));
    }

    #[test]
    fn test_trim() {
        let mut members = test_members(5);
        let tree = &mut members[0];
        tree.trim(4).unwrap();
        assert_eq!(tree.size(), 4);
        assert_eq!(tree.slots().len(), 7);
        assert!(matches!(tree.trim(6), Err(TreeKemError::InvalidIndex(_))));
    }

    #[test]
    fn test_equal_ignores_private_material() {
        let members = test_members(3);
        assert!(members[0].equal(&members[1]));
        assert!(members[1].equal(&members[2]));
        assert!(!members[0].equal(&TreeKem::one_member_group(b"leaf").unwrap()));
    }
}
