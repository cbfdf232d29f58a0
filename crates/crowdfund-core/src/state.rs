//! Campaign record layout.
//!
//! ```text
//! offset  size  field
//!      0     1  is_initialized
//!      1    32  authority
//!     33    32  vault
//!     65   200  description (UTF-8, zero padded)
//!    265     8  target (u64 LE)
//!    273     8  amount_raised (u64 LE)
//!    281     1  bump
//! ```
//!
//! Fields are packed in order with no padding; integers are little-endian.

use serde::{Deserialize, Serialize};

use crate::error::CrowdfundError;
use crate::pubkey::{Pubkey, PUBKEY_BYTES};

pub const DESCRIPTION_LEN: usize = 200;

pub const IS_INITIALIZED_OFFSET: usize = 0;
pub const AUTHORITY_OFFSET: usize = IS_INITIALIZED_OFFSET + 1;
pub const VAULT_OFFSET: usize = AUTHORITY_OFFSET + PUBKEY_BYTES;
pub const DESCRIPTION_OFFSET: usize = VAULT_OFFSET + PUBKEY_BYTES;
pub const TARGET_OFFSET: usize = DESCRIPTION_OFFSET + DESCRIPTION_LEN;
pub const AMOUNT_RAISED_OFFSET: usize = TARGET_OFFSET + 8;
pub const BUMP_OFFSET: usize = AMOUNT_RAISED_OFFSET + 8;

/// Total size of a packed record.
pub const CAMPAIGN_RECORD_LEN: usize = BUMP_OFFSET + 1;

/// Campaign state as stored in the record account.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignRecord {
    pub is_initialized: bool,
    pub authority: Pubkey,
    pub vault: Pubkey,
    pub description: String,
    pub target: u64,
    pub amount_raised: u64,
    pub bump: u8,
}

/// How strictly the `is_initialized` tag byte is read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TagMode {
    /// Any non-zero byte reads as initialized.
    Lenient,
    /// Only 0 and 1 are accepted; anything else is corruption.
    Strict,
}

impl CampaignRecord {
    pub const LEN: usize = CAMPAIGN_RECORD_LEN;

    /// Encode into a freshly allocated fixed-size buffer.
    pub fn pack(&self) -> Result<[u8; CAMPAIGN_RECORD_LEN], CrowdfundError> {
        let mut dst = [0u8; CAMPAIGN_RECORD_LEN];
        self.pack_into_slice(&mut dst)?;
        Ok(dst)
    }

    /// Encode into `dst`, which must be exactly [`CampaignRecord::LEN`] bytes.
    /// `dst` is left untouched on error.
    pub fn pack_into_slice(&self, dst: &mut [u8]) -> Result<(), CrowdfundError> {
        if dst.len() != Self::LEN {
            return Err(CrowdfundError::MalformedRecord(format!(
                "buffer is {} bytes, expected {}",
                dst.len(),
                Self::LEN
            )));
        }
        let description = encode_description(&self.description)?;

        dst[IS_INITIALIZED_OFFSET] = self.is_initialized as u8;
        dst[AUTHORITY_OFFSET..VAULT_OFFSET].copy_from_slice(self.authority.as_ref());
        dst[VAULT_OFFSET..DESCRIPTION_OFFSET].copy_from_slice(self.vault.as_ref());
        dst[DESCRIPTION_OFFSET..TARGET_OFFSET].copy_from_slice(&description);
        dst[TARGET_OFFSET..AMOUNT_RAISED_OFFSET].copy_from_slice(&self.target.to_le_bytes());
        dst[AMOUNT_RAISED_OFFSET..BUMP_OFFSET].copy_from_slice(&self.amount_raised.to_le_bytes());
        dst[BUMP_OFFSET] = self.bump;
        Ok(())
    }

    /// Decode with the lenient tag policy.
    pub fn unpack(src: &[u8]) -> Result<Self, CrowdfundError> {
        Self::unpack_with(src, TagMode::Lenient)
    }

    /// Decode rejecting any tag byte other than 0 or 1.
    pub fn unpack_strict(src: &[u8]) -> Result<Self, CrowdfundError> {
        Self::unpack_with(src, TagMode::Strict)
    }

    pub fn unpack_with(src: &[u8], mode: TagMode) -> Result<Self, CrowdfundError> {
        if src.len() != Self::LEN {
            return Err(CrowdfundError::MalformedRecord(format!(
                "record is {} bytes, expected {}",
                src.len(),
                Self::LEN
            )));
        }
        let is_initialized = match (src[IS_INITIALIZED_OFFSET], mode) {
            (0, _) => false,
            (1, _) | (_, TagMode::Lenient) => true,
            (tag, TagMode::Strict) => {
                return Err(CrowdfundError::MalformedRecord(format!(
                    "is_initialized tag is {tag}"
                )))
            }
        };
        let description: &[u8; DESCRIPTION_LEN] = src[DESCRIPTION_OFFSET..TARGET_OFFSET]
            .try_into()
            .map_err(|_| CrowdfundError::MalformedRecord("description field".into()))?;

        Ok(Self {
            is_initialized,
            authority: read_pubkey(&src[AUTHORITY_OFFSET..VAULT_OFFSET])?,
            vault: read_pubkey(&src[VAULT_OFFSET..DESCRIPTION_OFFSET])?,
            description: decode_description(description)?,
            target: read_u64(&src[TARGET_OFFSET..AMOUNT_RAISED_OFFSET])?,
            amount_raised: read_u64(&src[AMOUNT_RAISED_OFFSET..BUMP_OFFSET])?,
            bump: src[BUMP_OFFSET],
        })
    }
}

fn read_pubkey(src: &[u8]) -> Result<Pubkey, CrowdfundError> {
    Pubkey::try_from_slice(src).ok_or_else(|| CrowdfundError::MalformedRecord("pubkey field".into()))
}

fn read_u64(src: &[u8]) -> Result<u64, CrowdfundError> {
    src.try_into()
        .map(u64::from_le_bytes)
        .map_err(|_| CrowdfundError::MalformedRecord("u64 field".into()))
}

/// Right-pad `text` with zero bytes into the fixed description buffer.
pub fn encode_description(text: &str) -> Result<[u8; DESCRIPTION_LEN], CrowdfundError> {
    let bytes = text.as_bytes();
    if bytes.len() > DESCRIPTION_LEN {
        return Err(CrowdfundError::DescriptionTooLong { len: bytes.len() });
    }
    if bytes.contains(&0) {
        return Err(CrowdfundError::InvalidDescription);
    }
    let mut buf = [0u8; DESCRIPTION_LEN];
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(buf)
}

/// Read the text up to the first zero byte. Everything after it must be
/// zero padding, otherwise the buffer is ambiguous and rejected.
pub fn decode_description(buf: &[u8; DESCRIPTION_LEN]) -> Result<String, CrowdfundError> {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(DESCRIPTION_LEN);
    if let Some(offset) = buf[end..].iter().position(|&b| b != 0) {
        return Err(CrowdfundError::MalformedRecord(format!(
            "description has text after zero padding at byte {}",
            end + offset
        )));
    }
    String::from_utf8(buf[..end].to_vec())
        .map_err(|e| CrowdfundError::MalformedRecord(format!("description is not UTF-8: {e}")))
}
