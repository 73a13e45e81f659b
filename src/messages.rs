/// Protocol messages exchanged between group members and with external nodes.
/// Every message is plain data; transport and ordering are up to the caller.
///
/// Binary encoding uses bincode, JSON is available for logs and debugging.

use crate::crypto::{CiphertextMap, EcKemCiphertext};
use crate::error::Result;
use crate::node::NodeMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(message)?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

/// Encoding helpers shared by every message type.
pub trait WireMessage: Serialize + DeserializeOwned {
    fn to_bytes(&self) -> Result<Vec<u8>> {
        encode(self)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        decode(bytes)
    }

    fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// What a group publishes so that a user can add itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInitKey {
    pub size: usize,
    pub frontier: NodeMap,
}

/// Sent by the adder to the new member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupAddForJoiner {
    /// Group size before the add.
    pub size: usize,
    /// The joiner's leaf secret sealed to its init key.
    pub encrypted_leaf: EcKemCiphertext,
    pub frontier: NodeMap,
}

/// Broadcast by the adder to the existing members, the adder included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupAddForGroup {
    /// Group size before the add.
    pub size: usize,
    pub ciphertexts: Vec<CiphertextMap>,
    pub nodes: NodeMap,
}

/// Broadcast by a user that added itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAdd {
    /// Group size after the add.
    pub size: usize,
    pub ciphertexts: Vec<CiphertextMap>,
    pub nodes: NodeMap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUpdate {
    pub from: usize,
    pub ciphertexts: Vec<CiphertextMap>,
    pub nodes: NodeMap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRemove {
    pub index: usize,
    pub ciphertexts: Vec<CiphertextMap>,
    /// The remover's public view of the removed leaf's copath.
    pub copath: NodeMap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMove {
    pub from: usize,
    pub to: usize,
    pub ciphertexts: Vec<CiphertextMap>,
    pub nodes: NodeMap,
    /// The mover's public view of the destination leaf's copath.
    pub copath: NodeMap,
}

/// Root refresh sent by a member after an internal update, one ciphertext per
/// external node, each sealing the hash of the new internal root secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalRootUpdate {
    pub ciphertexts: BTreeMap<String, EcKemCiphertext>,
    pub root_public: Vec<u8>,
    pub root_sign_public: Vec<u8>,
}

/// Key rotation sent by an external node to the group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalNodeUpdate {
    /// Hash of the new external leaf secret, sealed to the last internal root.
    pub ciphertext: EcKemCiphertext,
    pub public: Vec<u8>,
    pub sign_public: Vec<u8>,
}

/// Catch-up record for one external node, sealed to a new member's key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalNodeJoin {
    pub public: Vec<u8>,
    pub sign_public: Vec<u8>,
    /// Secret of the internal root pinned for this external node.
    pub last_tree_root: EcKemCiphertext,
    /// Secret of the current shared root.
    pub root: EcKemCiphertext,
}

/// Everything a new member needs to adopt the group's external nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalNodeJoins {
    pub nodes: BTreeMap<String, ExternalNodeJoin>,
}

impl WireMessage for GroupInitKey {}
impl WireMessage for GroupAddForJoiner {}
impl WireMessage for GroupAddForGroup {}
impl WireMessage for UserAdd {}
impl WireMessage for UserUpdate {}
impl WireMessage for UserRemove {}
impl WireMessage for UserMove {}
impl WireMessage for ExternalRootUpdate {}
impl WireMessage for ExternalNodeUpdate {}
impl WireMessage for ExternalNodeJoins {}
