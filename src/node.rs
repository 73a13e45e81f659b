//! Tree nodes and slots.

use crate::crypto::{self, fingerprint};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Nodes keyed by tree position.
pub type NodeMap = BTreeMap<usize, Node>;

/// Key material held for one tree position.
///
/// A *full* node carries the ratchet secret and both private keys; it is only
/// known to members of the subtree it heads. Everyone else holds the
/// *public-only* projection.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Node {
    pub secret: Option<Vec<u8>>,
    pub public: Vec<u8>,
    pub private: Option<Vec<u8>>,
    pub sign_public: Vec<u8>,
    pub sign_private: Option<Vec<u8>>,
}

impl Node {
    /// Derive a full node (encryption and signing key pairs) from a ratchet secret.
    pub fn from_secret(secret: &[u8]) -> Result<Self> {
        let kp = crypto::key_pair_from_secret(secret)?;
        let kp_sign = crypto::signing_key_pair_from_secret(secret)?;
        Ok(Self {
            secret: Some(secret.to_vec()),
            public: kp.public.clone(),
            private: Some(kp.private.clone()),
            sign_public: kp_sign.public.clone(),
            sign_private: Some(kp_sign.private.clone()),
        })
    }

    pub fn public_only(public: Vec<u8>, sign_public: Vec<u8>) -> Self {
        Self {
            secret: None,
            public,
            private: None,
            sign_public,
            sign_private: None,
        }
    }

    /// Projection that is safe to hand to anyone.
    pub fn to_public(&self) -> Self {
        Self::public_only(self.public.clone(), self.sign_public.clone())
    }

    pub fn is_full(&self) -> bool {
        self.secret.is_some() && self.private.is_some()
    }

    pub fn secret(&self) -> Option<&[u8]> {
        self.secret.as_deref()
    }

    pub fn private(&self) -> Option<&[u8]> {
        self.private.as_deref()
    }

    pub fn sign_private(&self) -> Option<&[u8]> {
        self.sign_private.as_deref()
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("public", &fingerprint(&self.public))
            .field("full", &self.is_full())
            .finish()
    }
}

/// One position of the tree array. Removed members leave `Blank` slots that the
/// subtree walks route around.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Slot {
    #[default]
    Blank,
    Populated(Node),
}

impl Slot {
    pub fn node(&self) -> Option<&Node> {
        match self {
            Slot::Blank => None,
            Slot::Populated(node) => Some(node),
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, Slot::Blank)
    }
}
