//! Instruction payloads: one discriminator byte followed by little-endian
//! arguments.
//!
//! | tag | instruction | arguments                      | total |
//! |-----|-------------|--------------------------------|-------|
//! | 0   | Initialize  | target u64, description [200]  | 209   |
//! | 1   | Donate      | amount u64                     | 9     |
//! | 2   | Withdraw    | none                           | 1     |

use serde::{Deserialize, Serialize};

use crate::error::CrowdfundError;
use crate::pda::{AddressDeriver, CampaignAddresses};
use crate::pubkey::{system_program, Pubkey};
use crate::state::{decode_description, encode_description, DESCRIPTION_LEN};

pub const INITIALIZE_TAG: u8 = 0;
pub const DONATE_TAG: u8 = 1;
pub const WITHDRAW_TAG: u8 = 2;

pub const INITIALIZE_LEN: usize = 1 + 8 + DESCRIPTION_LEN;
pub const DONATE_LEN: usize = 1 + 8;
pub const WITHDRAW_LEN: usize = 1;

/// One account reference of an instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountMeta {
    pub pubkey: Pubkey,
    pub is_signer: bool,
    pub is_writable: bool,
}

impl AccountMeta {
    pub fn new(pubkey: Pubkey, is_signer: bool) -> Self {
        Self {
            pubkey,
            is_signer,
            is_writable: true,
        }
    }

    pub fn new_readonly(pubkey: Pubkey, is_signer: bool) -> Self {
        Self {
            pubkey,
            is_signer,
            is_writable: false,
        }
    }
}

/// A payload addressed to a program, with the accounts it touches.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub program_id: Pubkey,
    pub accounts: Vec<AccountMeta>,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
}

/// Decoded form of an instruction payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CampaignInstruction {
    /// Creates the campaign record and its vault.
    ///
    /// Accounts expected:
    ///
    /// 0. `[signer, writable]` The authority starting the campaign
    /// 1. `[writable]` The campaign record, derived from `["campaign", authority]`
    /// 2. `[writable]` The vault, derived from `["vault", campaign]`
    /// 3. `[]` The system program
    Initialize {
        target: u64,
        description: [u8; DESCRIPTION_LEN],
    },
    /// Moves `amount` lamports from the donor into the vault.
    ///
    /// Accounts expected:
    ///
    /// 0. `[signer, writable]` The donor
    /// 1. `[writable]` The campaign record
    /// 2. `[writable]` The vault
    /// 3. `[]` The system program
    Donate { amount: u64 },
    /// Pays the vault out to the authority and closes both accounts.
    ///
    /// Accounts expected:
    ///
    /// 0. `[signer, writable]` The authority
    /// 1. `[writable]` The campaign record
    /// 2. `[writable]` The vault
    Withdraw,
}

impl CampaignInstruction {
    /// Build an Initialize payload from text, padding the description.
    pub fn initialize(target: u64, description: &str) -> Result<Self, CrowdfundError> {
        Ok(Self::Initialize {
            target,
            description: encode_description(description)?,
        })
    }

    pub fn tag(&self) -> u8 {
        match self {
            Self::Initialize { .. } => INITIALIZE_TAG,
            Self::Donate { .. } => DONATE_TAG,
            Self::Withdraw => WITHDRAW_TAG,
        }
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.packed_len());
        buf.push(self.tag());
        match self {
            Self::Initialize {
                target,
                description,
            } => {
                buf.extend_from_slice(&target.to_le_bytes());
                buf.extend_from_slice(description);
            }
            Self::Donate { amount } => buf.extend_from_slice(&amount.to_le_bytes()),
            Self::Withdraw => {}
        }
        buf
    }

    fn packed_len(&self) -> usize {
        match self {
            Self::Initialize { .. } => INITIALIZE_LEN,
            Self::Donate { .. } => DONATE_LEN,
            Self::Withdraw => WITHDRAW_LEN,
        }
    }

    /// Decode a payload. Lengths are exact; trailing bytes are rejected.
    pub fn unpack(input: &[u8]) -> Result<Self, CrowdfundError> {
        let (tag, rest) = input
            .split_first()
            .ok_or(CrowdfundError::InvalidInstruction)?;
        match *tag {
            INITIALIZE_TAG if input.len() == INITIALIZE_LEN => {
                let (target, description) = rest.split_at(8);
                Ok(Self::Initialize {
                    target: read_u64(target)?,
                    description: description
                        .try_into()
                        .map_err(|_| CrowdfundError::InvalidInstruction)?,
                })
            }
            DONATE_TAG if input.len() == DONATE_LEN => Ok(Self::Donate {
                amount: read_u64(rest)?,
            }),
            WITHDRAW_TAG if input.len() == WITHDRAW_LEN => Ok(Self::Withdraw),
            _ => Err(CrowdfundError::InvalidInstruction),
        }
    }

    /// Description text of an Initialize payload.
    pub fn description_text(&self) -> Option<Result<String, CrowdfundError>> {
        match self {
            Self::Initialize { description, .. } => Some(decode_description(description)),
            _ => None,
        }
    }
}

fn read_u64(src: &[u8]) -> Result<u64, CrowdfundError> {
    src.try_into()
        .map(u64::from_le_bytes)
        .map_err(|_| CrowdfundError::InvalidInstruction)
}

/// Initialize instruction for `authority`'s already derived addresses.
pub fn initialize(
    program_id: &Pubkey,
    authority: &Pubkey,
    addresses: &CampaignAddresses,
    target: u64,
    description: &str,
) -> Result<Instruction, CrowdfundError> {
    Ok(Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(*authority, true),
            AccountMeta::new(addresses.campaign, false),
            AccountMeta::new(addresses.vault, false),
            AccountMeta::new_readonly(system_program::ID, false),
        ],
        data: CampaignInstruction::initialize(target, description)?.pack(),
    })
}

/// Derive the addresses for `authority` and build its Initialize instruction.
pub fn initialize_derived<D: AddressDeriver + ?Sized>(
    deriver: &D,
    program_id: &Pubkey,
    authority: &Pubkey,
    target: u64,
    description: &str,
) -> Result<(Instruction, CampaignAddresses), CrowdfundError> {
    let addresses = CampaignAddresses::derive(deriver, program_id, authority)?;
    let ix = initialize(program_id, authority, &addresses, target, description)?;
    Ok((ix, addresses))
}

pub fn donate(
    program_id: &Pubkey,
    donor: &Pubkey,
    campaign: &Pubkey,
    vault: &Pubkey,
    amount: u64,
) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(*donor, true),
            AccountMeta::new(*campaign, false),
            AccountMeta::new(*vault, false),
            AccountMeta::new_readonly(system_program::ID, false),
        ],
        data: CampaignInstruction::Donate { amount }.pack(),
    }
}

pub fn withdraw(
    program_id: &Pubkey,
    authority: &Pubkey,
    campaign: &Pubkey,
    vault: &Pubkey,
) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(*authority, true),
            AccountMeta::new(*campaign, false),
            AccountMeta::new(*vault, false),
        ],
        data: CampaignInstruction::Withdraw.pack(),
    }
}

mod hex_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(&encoded).map_err(D::Error::custom)
    }
}
