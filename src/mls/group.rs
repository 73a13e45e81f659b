/// OpenMLS group operations used to drive an MLS-backed multi-root tree.
/// Thin wrappers that map OpenMLS errors into `TreeKemError::Mls`.

use crate::error::{Result, TreeKemError};
use openmls::prelude::*;
use openmls_basic_credential::SignatureKeyPair;
use tls_codec::{Deserialize, Serialize};

pub const CIPHERSUITE: Ciphersuite = Ciphersuite::MLS_128_DHKEMX25519_AES128GCM_SHA256_Ed25519;

fn mls_err(e: impl std::fmt::Display) -> TreeKemError {
    TreeKemError::Mls(e.to_string())
}

/// Generate a credential with key for `identity`, storing the signature key
/// in the provider so OpenMLS has access to it.
pub fn generate_credential_with_key(
    identity: &str,
    provider: &impl OpenMlsProvider,
) -> Result<(CredentialWithKey, SignatureKeyPair)> {
    let credential = BasicCredential::new(identity.as_bytes().to_vec());
    let signature_keys = SignatureKeyPair::new(CIPHERSUITE.signature_algorithm()).map_err(mls_err)?;
    signature_keys.store(provider.storage()).map_err(mls_err)?;

    let credential_with_key = CredentialWithKey {
        credential: credential.into(),
        signature_key: signature_keys.to_public_vec().into(),
    };

    Ok((credential_with_key, signature_keys))
}

pub fn generate_key_package_bundle(
    credential: &CredentialWithKey,
    signer: &SignatureKeyPair,
    provider: &impl OpenMlsProvider,
) -> Result<KeyPackageBundle> {
    KeyPackage::builder()
        .build(CIPHERSUITE, provider, signer, credential.clone())
        .map_err(mls_err)
}

pub fn create_group(
    credential: &CredentialWithKey,
    signer: &SignatureKeyPair,
    provider: &impl OpenMlsProvider,
) -> Result<MlsGroup> {
    let group_config = MlsGroupCreateConfig::builder()
        .ciphersuite(CIPHERSUITE)
        .build();

    MlsGroup::new(provider, signer, &group_config, credential.clone()).map_err(mls_err)
}

/// Returns (commit for existing members, welcome for new members).
/// The pending commit still has to be merged.
pub fn add_members(
    group: &mut MlsGroup,
    provider: &impl OpenMlsProvider,
    signer: &SignatureKeyPair,
    key_packages: &[&KeyPackage],
) -> Result<(MlsMessageOut, MlsMessageOut)> {
    let key_packages_owned: Vec<KeyPackage> = key_packages.iter().map(|kp| (*kp).clone()).collect();
    let (commit, welcome, _group_info) = group
        .add_members(provider, signer, &key_packages_owned)
        .map_err(mls_err)?;
    Ok((commit, welcome))
}

/// Rotate the local leaf. Returns the commit for the other members; the
/// pending commit still has to be merged.
pub fn self_update(
    group: &mut MlsGroup,
    provider: &impl OpenMlsProvider,
    signer: &SignatureKeyPair,
) -> Result<MlsMessageOut> {
    let bundle = group
        .self_update(provider, signer, LeafNodeParameters::default())
        .map_err(mls_err)?;
    let (commit, _welcome, _group_info) = bundle.into_contents();
    Ok(commit)
}

pub fn merge_pending_commit(group: &mut MlsGroup, provider: &impl OpenMlsProvider) -> Result<()> {
    group.merge_pending_commit(provider).map_err(mls_err)
}

pub fn export_ratchet_tree(group: &MlsGroup) -> RatchetTreeIn {
    group.export_ratchet_tree().into()
}

pub fn process_welcome_message(
    provider: &impl OpenMlsProvider,
    config: &MlsGroupJoinConfig,
    welcome_message: &MlsMessageIn,
    ratchet_tree: Option<RatchetTreeIn>,
) -> Result<MlsGroup> {
    let welcome = match welcome_message.clone().extract() {
        MlsMessageBodyIn::Welcome(w) => w,
        _ => return Err(TreeKemError::Mls("Expected Welcome message".to_string())),
    };

    let staged_join =
        StagedWelcome::new_from_welcome(provider, config, welcome, ratchet_tree).map_err(mls_err)?;
    staged_join.into_group(provider).map_err(mls_err)
}

pub fn process_message(
    group: &mut MlsGroup,
    provider: &impl OpenMlsProvider,
    message: &MlsMessageIn,
) -> Result<ProcessedMessage> {
    let protocol_message = message
        .clone()
        .try_into_protocol_message()
        .map_err(mls_err)?;
    group.process_message(provider, protocol_message).map_err(mls_err)
}

/// Process and merge a commit sent by another member.
pub fn apply_commit(
    group: &mut MlsGroup,
    provider: &impl OpenMlsProvider,
    message: &MlsMessageIn,
) -> Result<()> {
    let processed = process_message(group, provider, message)?;
    match processed.into_content() {
        ProcessedMessageContent::StagedCommitMessage(staged_commit) => {
            group.merge_staged_commit(provider, *staged_commit).map_err(mls_err)?;
            log::debug!("Merged commit, group now at epoch {}", group.epoch().as_u64());
            Ok(())
        }
        _ => Err(TreeKemError::Mls("Expected commit message".to_string())),
    }
}

/// Convert an outgoing message into its incoming form, as a transport would.
pub fn to_message_in(message: &MlsMessageOut) -> Result<MlsMessageIn> {
    let bytes = message.tls_serialize_detached().map_err(mls_err)?;
    MlsMessageIn::tls_deserialize(&mut bytes.as_slice()).map_err(mls_err)
}
