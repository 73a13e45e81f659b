/// Integration tests for TreeKEM group operations
///
/// Tests cover adds (by another member and self-adds), updates, removals,
/// moves, and the failure modes of out-of-order delivery.

mod common;

use common::{assert_all_converged, assert_converged, group_add_member, leaf, TestGroupBuilder};
use multi_treekem::messages::{UserMove, UserRemove, UserUpdate, WireMessage};
use multi_treekem::{Node, NodeMap, TreeKemError, TreeKemState};

#[test]
fn test_group_add_converges_for_every_size() {
    for size in 1..=9 {
        let members = TestGroupBuilder::new().size(size).build();
        assert_eq!(members.len(), size);
        for (i, member) in members.iter().enumerate() {
            assert_eq!(member.index(), i);
            assert_eq!(member.size(), size);
        }
        assert_all_converged(&members);
    }
}

#[test]
fn test_growing_to_thirty_two_converges_at_each_step() {
    let mut members = TestGroupBuilder::new().size(1).build();
    while members.len() < 32 {
        group_add_member(&mut members);
        let joiner = members.last().unwrap();
        assert_eq!(joiner.index(), members.len() - 1);
        assert!(members[0].equal(joiner));
        assert_eq!(members[0].root_secret(), joiner.root_secret());
    }
    assert_all_converged(&members);
}

#[test]
fn test_self_add_converges() {
    let members = TestGroupBuilder::new().size(6).self_add(true).build();
    assert_all_converged(&members);
    assert_eq!(members[5].index(), 5);
}

#[test]
fn test_every_member_can_update() {
    let mut members = TestGroupBuilder::new().size(5).build();

    for sender in 0..members.len() {
        let before = members[0].root_secret().unwrap().to_vec();
        let update = members[sender].update(&leaf()).unwrap();

        for (i, member) in members.iter_mut().enumerate() {
            if i != sender {
                member.handle_update(&update).unwrap();
            }
        }

        assert_all_converged(&members);
        assert_ne!(members[0].root_secret().unwrap(), before.as_slice());
    }
}

#[test]
fn test_update_survives_the_wire() {
    let mut members = TestGroupBuilder::new().size(3).build();
    let update = members[2].update(&leaf()).unwrap();

    let bytes = update.to_bytes().unwrap();
    let decoded = UserUpdate::from_bytes(&bytes).unwrap();
    assert_eq!(decoded, update);

    members[0].handle_update(&decoded).unwrap();
    members[1].handle_update(&decoded).unwrap();
    assert_all_converged(&members);
}

#[test]
fn test_missed_update_is_desync() {
    let mut members = TestGroupBuilder::new().size(2).build();

    // Bob rotates but Alice never sees it, so Alice seals to Bob's old leaf
    let _lost = members[1].update(&leaf()).unwrap();
    let update = members[0].update(&leaf()).unwrap();

    let before = members[1].root_secret().unwrap().to_vec();
    let err = members[1].handle_update(&update).unwrap_err();
    assert!(err.is_desync());
    assert_eq!(members[1].root_secret().unwrap(), before.as_slice());
}

#[test]
fn test_remove() {
    let mut members = TestGroupBuilder::new().size(5).build();
    let removed = 2;
    let old_root = members[removed].root_secret().unwrap().to_vec();

    let copath = members[0].copath_of(removed);
    let remove = members[0].remove(&leaf(), removed, &copath).unwrap();

    for (i, member) in members.iter_mut().enumerate() {
        if i != removed {
            member.handle_remove(&remove).unwrap();
        }
    }

    let err = members[removed].handle_remove(&remove).unwrap_err();
    assert!(err.is_desync());

    let remaining: Vec<_> = members
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != removed)
        .map(|(_, m)| m)
        .collect();
    assert_converged(&remaining);
    assert_ne!(remaining[0].root_secret().unwrap(), old_root.as_slice());
    assert!(remaining[0].nodes()[2 * removed].is_blank());

    // The group keeps working after the removal
    let update = members[3].update(&leaf()).unwrap();
    for i in [0, 1, 4] {
        members[i].handle_update(&update).unwrap();
    }
    let remaining: Vec<_> = [0, 1, 3, 4].iter().map(|&i| &members[i]).collect();
    assert_converged(&remaining);
}

#[test]
fn test_remove_last_then_trim() {
    let mut members = TestGroupBuilder::new().size(4).build();
    let copath = members[0].copath_of(3);
    let remove = members[0].remove(&leaf(), 3, &copath).unwrap();
    for member in members.iter_mut().take(3) {
        member.handle_remove(&remove).unwrap();
    }

    members.truncate(3);
    for member in members.iter_mut() {
        member.trim(3).unwrap();
    }
    assert_all_converged(&members);
    assert_eq!(members[0].size(), 3);

    let update = members[1].update(&leaf()).unwrap();
    members[0].handle_update(&update).unwrap();
    members[2].handle_update(&update).unwrap();
    assert_all_converged(&members);
}

#[test]
fn test_move_into_vacated_leaf() {
    let mut members = TestGroupBuilder::new().size(4).build();

    let copath = members[0].copath_of(3);
    let remove = members[0].remove(&leaf(), 3, &copath).unwrap();
    for member in members.iter_mut().take(3) {
        member.handle_remove(&remove).unwrap();
    }
    members.truncate(3);

    let mover = 1;
    let move_leaf = leaf();
    let copath = members[mover].copath_of(3);
    let mv = members[mover].move_to(&move_leaf, 3, &copath).unwrap();
    assert_eq!((mv.from, mv.to), (1, 3));

    members[mover].handle_self_move(&mv, &move_leaf).unwrap();
    members[0].handle_move(&mv).unwrap();
    members[2].handle_move(&mv).unwrap();

    assert_eq!(members[mover].index(), 3);
    assert_all_converged(&members);

    let update = members[0].update(&leaf()).unwrap();
    members[1].handle_update(&update).unwrap();
    members[2].handle_update(&update).unwrap();
    assert_all_converged(&members);
}

#[test]
fn test_remove_rejects_bad_index() {
    let mut members = TestGroupBuilder::new().size(2).build();
    let copath = members[0].copath();
    assert!(matches!(
        members[0].remove(&leaf(), 2, &copath),
        Err(TreeKemError::InvalidIndex(_))
    ));
}

#[test]
fn test_update_routes_around_blank_copath_head() {
    let mut members = TestGroupBuilder::new().size(4).build();

    let copath = members[0].copath_of(1);
    let remove = members[0].remove(&leaf(), 1, &copath).unwrap();
    for i in [0, 2, 3] {
        members[i].handle_remove(&remove).unwrap();
    }
    assert!(members[2].nodes()[1].is_blank());

    // Leaf 2's copath is [6, 1]; node 1 is blank, so the secret goes to leaf 0
    let update = members[2].update(&leaf()).unwrap();
    assert_eq!(update.ciphertexts[1].keys().copied().collect::<Vec<_>>(), vec![0]);

    members[0].handle_update(&update).unwrap();
    members[3].handle_update(&update).unwrap();
    let remaining: Vec<_> = [0, 2, 3].iter().map(|&i| &members[i]).collect();
    assert_converged(&remaining);
}

#[test]
fn test_handle_move_rejects_bad_leaves() {
    let mut members = TestGroupBuilder::new().size(4).build();
    let copath = members[0].copath_of(3);
    let remove = members[0].remove(&leaf(), 3, &copath).unwrap();
    for member in members.iter_mut().take(3) {
        member.handle_remove(&remove).unwrap();
    }

    let copath = members[1].copath_of(3);
    let mv = members[1].move_to(&leaf(), 3, &copath).unwrap();
    let before = members[0].nodes().to_vec();

    let out_of_range = UserMove { from: 99, ..mv.clone() };
    assert!(matches!(
        members[0].handle_move(&out_of_range),
        Err(TreeKemError::InvalidIndex(_))
    ));

    let onto_itself = UserMove { from: 3, ..mv.clone() };
    assert!(matches!(
        members[0].handle_move(&onto_itself),
        Err(TreeKemError::InvalidIndex(_))
    ));

    let from_blank = UserMove { from: 3, to: 1, ..mv.clone() };
    assert!(members[0].handle_move(&from_blank).unwrap_err().is_desync());

    let past_the_end = UserMove { to: 4, ..mv.clone() };
    assert!(matches!(
        members[0].handle_move(&past_the_end),
        Err(TreeKemError::InvalidIndex(_))
    ));

    assert_eq!(members[0].nodes(), before.as_slice());
    members[0].handle_move(&mv).unwrap();
}

#[test]
fn test_only_adds_may_name_the_next_leaf() {
    let mut members = TestGroupBuilder::new().size(2).build();
    let gik = members[0].group_init_key();
    let joiner_leaf = leaf();
    let user_add = TreeKemState::join(&joiner_leaf, &gik).unwrap();

    let remove = UserRemove {
        index: 2,
        ciphertexts: user_add.ciphertexts.clone(),
        copath: NodeMap::new(),
    };
    assert!(matches!(
        members[0].handle_remove(&remove),
        Err(TreeKemError::InvalidIndex(_))
    ));

    let update = UserUpdate {
        from: 2,
        ciphertexts: user_add.ciphertexts.clone(),
        nodes: user_add.nodes.clone(),
    };
    assert!(matches!(
        members[0].handle_update(&update),
        Err(TreeKemError::InvalidIndex(_))
    ));
    assert_eq!(members[0].size(), 2);

    // The same ciphertexts are fine as an add
    for member in members.iter_mut() {
        member.handle_user_add(&user_add).unwrap();
    }
    members.push(TreeKemState::from_user_add(&joiner_leaf, &gik).unwrap());
    assert_all_converged(&members);
}

#[test]
fn test_update_with_nodes_outside_the_tree_is_rejected() {
    let mut members = TestGroupBuilder::new().size(3).build();
    let update = members[1].update(&leaf()).unwrap();
    let before = members[0].nodes().to_vec();

    let mut oversized = update.clone();
    oversized
        .nodes
        .insert(usize::MAX, Node::from_secret(b"stray").unwrap().to_public());
    assert!(matches!(
        members[0].handle_update(&oversized),
        Err(TreeKemError::InvalidIndex(_))
    ));

    let mut past_width = update.clone();
    past_width
        .nodes
        .insert(5, Node::from_secret(b"stray").unwrap().to_public());
    assert!(matches!(
        members[0].handle_update(&past_width),
        Err(TreeKemError::InvalidIndex(_))
    ));
    assert_eq!(members[0].nodes(), before.as_slice());

    members[0].handle_update(&update).unwrap();
    members[2].handle_update(&update).unwrap();
    assert_all_converged(&members);
}
