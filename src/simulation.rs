/// In-process run of a multi-root group: builds the group, invites external
/// nodes, lets late members catch up, then runs update rounds and checks that
/// every participant ends on the same roots.

use crate::config::SimulationConfig;
use crate::crypto::{self, SECRET_LEN};
use crate::error::{Result, TreeKemError};
use crate::multi::{MultiTreeKem, MultiTreeKemExternal};
use crate::state::TreeKemState;
use log::{debug, info};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub members: usize,
    pub chatbots: usize,
    pub rounds: usize,
    pub internal_root: String,
    /// External node id to the fingerprint of its shared root.
    pub root_fingerprints: BTreeMap<String, String>,
    pub converged: bool,
}

impl std::fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{} members, {} external nodes, {} rounds",
            self.members, self.chatbots, self.rounds
        )?;
        writeln!(f, "internal root: {}", self.internal_root)?;
        for (id, fingerprint) in &self.root_fingerprints {
            writeln!(f, "{}: {}", id, fingerprint)?;
        }
        write!(f, "converged: {}", self.converged)
    }
}

struct Chatbot {
    id: String,
    external: MultiTreeKemExternal,
}

fn chatbot_id(n: usize) -> String {
    format!("cb-{}", n)
}

/// Add one member through `members[0]` and bring it up to date on the
/// external nodes.
fn add_member(members: &mut Vec<MultiTreeKem>) -> Result<()> {
    let init_leaf = crypto::random_bytes(SECRET_LEN);
    let init_keys = crypto::key_pair_from_secret(&init_leaf)?;

    let (for_group, for_joiner) = members[0].tree_kem().add(&init_keys.public)?;
    for member in members.iter() {
        member.tree_kem_mut().handle_group_add(&for_group)?;
    }

    let joiner = MultiTreeKem::new(TreeKemState::from_group_add(&init_leaf, &for_joiner)?);
    let joiner_public = joiner
        .tree_kem()
        .self_node()
        .map(|node| node.public.clone())
        .ok_or_else(|| TreeKemError::ProtocolDesync("joiner has no leaf".to_string()))?;
    let joins = members[0].get_external_node_joins_without_update(&joiner_public)?;
    joiner.set_external_node_joins_without_update(&joins)?;

    debug!("Member {} joined", joiner.tree_kem().index());
    members.push(joiner);
    Ok(())
}

fn invite(members: &[MultiTreeKem], id: &str) -> Result<MultiTreeKemExternal> {
    let (ciphertext, init_leaf) = members[0].get_external_node_join(id)?;
    for member in &members[1..] {
        member.add_external_node(id, &ciphertext)?;
    }

    let tree = members[0].tree_kem();
    let (public, sign_public) = match tree.root_node() {
        Some(root) => (root.public.clone(), root.sign_public.clone()),
        None => return Err(TreeKemError::ProtocolDesync("group has no root".to_string())),
    };
    MultiTreeKemExternal::new(&public, &sign_public, &init_leaf)
}

fn run_round(round: usize, members: &[MultiTreeKem], chatbots: &mut [Chatbot]) -> Result<()> {
    for chatbot in chatbots.iter_mut() {
        let update = chatbot.external.update_external_node()?;
        for member in members {
            member.handle_external_node_update(&chatbot.id, &update)?;
        }
    }

    let ids: Vec<String> = chatbots.iter().map(|c| c.id.clone()).collect();
    let updater = round % members.len();
    let update = members[updater].update_tree_kem(&ids)?;

    for (i, member) in members.iter().enumerate() {
        if i != updater {
            member.handle_tree_kem_update(&update.user_update, &ids)?;
        }
    }
    for chatbot in chatbots.iter_mut() {
        chatbot.external.handle_root_update(&chatbot.id, &update.external)?;
    }

    info!("Round {} done, member {} updated", round, updater);
    Ok(())
}

fn converged(members: &[MultiTreeKem], chatbots: &[Chatbot]) -> bool {
    let first = members[0].tree_kem();
    let internal_agrees = members[1..].iter().all(|member| {
        let tree = member.tree_kem();
        tree.equal(&first) && tree.root_secret() == first.root_secret()
    });

    let external_agrees = chatbots.iter().all(|chatbot| {
        members
            .iter()
            .all(|member| member.root_secret(&chatbot.id).as_deref() == Some(chatbot.external.root_secret()))
    });

    internal_agrees && external_agrees
}

pub fn run(config: &SimulationConfig) -> Result<SimulationReport> {
    config.validate()?;

    let creator = TreeKemState::one_member_group(&crypto::random_bytes(SECRET_LEN))?;
    let mut members = vec![MultiTreeKem::new(creator)];

    // External nodes are invited before the rest of the group exists so that
    // every later member has to catch up on them.
    let mut chatbots = Vec::with_capacity(config.chatbots);
    for n in 0..config.chatbots {
        let id = chatbot_id(n);
        let external = invite(&members, &id)?;
        chatbots.push(Chatbot { id, external });
    }
    info!("Invited {} external nodes", chatbots.len());

    while members.len() < config.members {
        add_member(&mut members)?;
    }
    info!("Group has {} members", members.len());

    for round in 0..config.rounds {
        run_round(round, &members, &mut chatbots)?;
    }

    let converged = converged(&members, &chatbots);
    let internal_root = members[0]
        .tree_kem()
        .root_public()
        .map(crypto::fingerprint)
        .unwrap_or_default();
    let root_fingerprints = chatbots
        .iter()
        .map(|chatbot| {
            (
                chatbot.id.clone(),
                crypto::fingerprint(chatbot.external.root_public()),
            )
        })
        .collect();

    Ok(SimulationReport {
        members: members.len(),
        chatbots: chatbots.len(),
        rounds: config.rounds,
        internal_root,
        root_fingerprints,
        converged,
    })
}
