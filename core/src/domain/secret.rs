use serde::{Deserialize, Serialize};

use crate::ids::UserAccountId;
use crate::time::TimestampSeconds;

/// Name is unique within owner. `encrypted_value` is ciphertext sealed to
/// the TEE; the host never holds plaintext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Secret {
    pub owner: UserAccountId,
    pub name: String,
    pub version: u32,
    pub encrypted_value: Vec<u8>,
    pub created: TimestampSeconds,
    pub updated: TimestampSeconds,
}
