//! Common test utilities and helpers for integration tests
//! Provides group builders and convergence assertions for TreeKEM and multi-root groups

#![allow(dead_code)]

use multi_treekem::crypto::{self, SECRET_LEN};
use multi_treekem::multi::{MultiTreeKem, MultiTreeKemExternal};
use multi_treekem::TreeKemState;

/// Fresh 32-byte leaf secret
pub fn leaf() -> Vec<u8> {
    crypto::random_bytes(SECRET_LEN)
}

/// Helper for building TreeKEM groups member by member
pub struct TestGroupBuilder {
    size: usize,
    self_add: bool,
}

impl Default for TestGroupBuilder {
    fn default() -> Self {
        TestGroupBuilder {
            size: 3,
            self_add: false,
        }
    }
}

impl TestGroupBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Grow the group with self-adds instead of adds by the last member
    pub fn self_add(mut self, self_add: bool) -> Self {
        self.self_add = self_add;
        self
    }

    pub fn build(self) -> Vec<TreeKemState> {
        let mut members = vec![TreeKemState::one_member_group(&leaf()).unwrap()];
        while members.len() < self.size {
            if self.self_add {
                self_add_member(&mut members);
            } else {
                group_add_member(&mut members);
            }
        }
        members
    }
}

/// The last member adds a new one; everyone, the adder included, applies the group message
pub fn group_add_member(members: &mut Vec<TreeKemState>) {
    let init_leaf = leaf();
    let init_keys = crypto::key_pair_from_secret(&init_leaf).unwrap();

    let adder = members.last().unwrap();
    let (for_group, for_joiner) = adder.add(&init_keys.public).unwrap();

    for member in members.iter_mut() {
        member.handle_group_add(&for_group).unwrap();
    }
    members.push(TreeKemState::from_group_add(&init_leaf, &for_joiner).unwrap());
}

/// A new member adds itself from the group's published init key
pub fn self_add_member(members: &mut Vec<TreeKemState>) {
    let gik = members[0].group_init_key();
    let leaf = leaf();

    let user_add = TreeKemState::join(&leaf, &gik).unwrap();
    for member in members.iter_mut() {
        member.handle_user_add(&user_add).unwrap();
    }
    members.push(TreeKemState::from_user_add(&leaf, &gik).unwrap());
}

/// Every member agrees on the tree and the root secret
pub fn assert_converged(members: &[&TreeKemState]) {
    let first = members[0];
    for (i, member) in members.iter().enumerate().skip(1) {
        assert!(first.equal(member), "member {} disagrees on the tree", i);
        assert_eq!(
            first.root_secret(),
            member.root_secret(),
            "member {} disagrees on the root",
            i
        );
    }
}

pub fn assert_all_converged(members: &[TreeKemState]) {
    let refs: Vec<&TreeKemState> = members.iter().collect();
    assert_converged(&refs);
}

pub fn multi_group(size: usize) -> Vec<MultiTreeKem> {
    TestGroupBuilder::new()
        .size(size)
        .build()
        .into_iter()
        .map(MultiTreeKem::new)
        .collect()
}

/// `inviter` invites `id`; everyone else adopts it
pub fn invite_chatbot(members: &[MultiTreeKem], inviter: usize, id: &str) -> MultiTreeKemExternal {
    let (ciphertext, init_leaf) = members[inviter].get_external_node_join(id).unwrap();
    for (i, member) in members.iter().enumerate() {
        if i != inviter {
            member.add_external_node(id, &ciphertext).unwrap();
        }
    }

    let tree = members[inviter].tree_kem();
    MultiTreeKemExternal::new(
        tree.root_public().unwrap(),
        tree.root_sign_public().unwrap(),
        &init_leaf,
    )
    .unwrap()
}

pub fn assert_roots_match(members: &[MultiTreeKem], id: &str, chatbot: &MultiTreeKemExternal) {
    for (i, member) in members.iter().enumerate() {
        assert_eq!(
            member.root_secret(id).unwrap(),
            chatbot.root_secret(),
            "member {} disagrees with {}",
            i,
            id
        );
        assert_eq!(member.root_public(id).unwrap(), chatbot.root_public());
    }
}
