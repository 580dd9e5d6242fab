//! Key encoding utilities for `RocksDB`.
//!
//! Config ids are encoded big-endian so iteration order matches id order, and
//! association keys concatenate two ids so either side can be prefix-scanned.

use xnat_jupyter_core::{ConfigId, UserId};

/// Encode a config key (the id's big-endian bytes).
#[must_use]
pub fn config_key(id: ConfigId) -> Vec<u8> {
    id.to_be_bytes().to_vec()
}

/// Encode an association key: `owner || member`.
#[must_use]
pub fn link_key(owner: ConfigId, member: ConfigId) -> Vec<u8> {
    let mut key = Vec::with_capacity(16);
    key.extend_from_slice(&owner.to_be_bytes());
    key.extend_from_slice(&member.to_be_bytes());
    key
}

/// Encode an owner prefix for scanning all members of an association.
#[must_use]
pub fn link_prefix(owner: ConfigId) -> Vec<u8> {
    config_key(owner)
}

/// Extract the member id from an association key.
///
/// Returns `None` if the key is not exactly 16 bytes.
#[must_use]
pub fn link_member(key: &[u8]) -> Option<ConfigId> {
    if key.len() != 16 {
        return None;
    }
    ConfigId::from_be_slice(&key[8..16]).ok()
}

/// Encode a launch record key: `user_id || servername`.
///
/// The default server (empty servername) encodes as the bare user id.
#[must_use]
pub fn user_options_key(user_id: UserId, servername: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + servername.len());
    key.extend_from_slice(&user_id.to_be_bytes());
    key.extend_from_slice(servername.as_bytes());
    key
}

/// Encode a sequence key.
#[must_use]
pub fn sequence_key(name: &str) -> Vec<u8> {
    name.as_bytes().to_vec()
}
