use thiserror::Error;

use crate::pubkey::Pubkey;

/// Canonical error type exposed by the protocol core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CrowdfundError {
    /// Record bytes of the wrong length, a corrupt tag byte, or an
    /// unreadable description.
    #[error("malformed campaign record: {0}")]
    MalformedRecord(String),

    /// Description text does not fit the fixed 200-byte buffer.
    #[error("description is {len} bytes, limit is 200")]
    DescriptionTooLong { len: usize },

    /// Description text contains a NUL character, which the zero padding
    /// cannot represent.
    #[error("description contains a NUL character")]
    InvalidDescription,

    /// A supplied address differs from the one derived from its seeds.
    #[error("address mismatch: expected {expected}, got {actual}")]
    AddressMismatch { expected: Pubkey, actual: Pubkey },

    /// A state machine precondition does not hold.
    #[error("invalid transition: {0}")]
    InvalidTransition(Rejection),

    /// Instruction payload could not be decoded.
    #[error("could not deserialize instruction data")]
    InvalidInstruction,

    /// Seeds rejected by the address derivation.
    #[error("invalid seeds: {0}")]
    InvalidSeeds(&'static str),

    /// Fewer account references than the instruction requires.
    #[error("not enough account keys for instruction")]
    NotEnoughAccountKeys,
}

impl CrowdfundError {
    /// Stable custom error code reported by the program.
    pub fn code(&self) -> u32 {
        match self {
            CrowdfundError::InvalidInstruction => 0,
            CrowdfundError::MalformedRecord(_) => 1,
            CrowdfundError::AddressMismatch { .. } => 2,
            CrowdfundError::InvalidTransition(Rejection::AlreadyInitialized) => 3,
            CrowdfundError::InvalidTransition(Rejection::WrongAuthority) => 4,
            CrowdfundError::DescriptionTooLong { .. } => 5,
            CrowdfundError::InvalidDescription => 6,
            CrowdfundError::InvalidSeeds(_) => 7,
            CrowdfundError::NotEnoughAccountKeys => 8,
            CrowdfundError::InvalidTransition(other) => 100 + *other as u32,
        }
    }
}

/// Precondition failures of the campaign state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[repr(u32)]
pub enum Rejection {
    #[error("required signature missing")]
    MissingSignature = 0,
    #[error("campaign account has been created already")]
    AlreadyInitialized = 1,
    #[error("campaign account is not initialized")]
    NotInitialized = 2,
    #[error("signer is the wrong authority")]
    WrongAuthority = 3,
    #[error("target must be greater than zero")]
    ZeroTarget = 4,
    #[error("amount must be greater than zero")]
    ZeroAmount = 5,
    #[error("amount raised would overflow")]
    Overflow = 6,
    #[error("account is not owned by the program")]
    IllegalOwner = 7,
}

impl From<Rejection> for CrowdfundError {
    fn from(r: Rejection) -> Self {
        CrowdfundError::InvalidTransition(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_and_distinct() {
        let errors = [
            CrowdfundError::InvalidInstruction,
            CrowdfundError::MalformedRecord("x".into()),
            CrowdfundError::AddressMismatch {
                expected: Pubkey::default(),
                actual: Pubkey::default(),
            },
            CrowdfundError::from(Rejection::AlreadyInitialized),
            CrowdfundError::from(Rejection::WrongAuthority),
            CrowdfundError::DescriptionTooLong { len: 201 },
            CrowdfundError::InvalidDescription,
            CrowdfundError::InvalidSeeds("max seed length exceeded"),
            CrowdfundError::NotEnoughAccountKeys,
            CrowdfundError::from(Rejection::MissingSignature),
            CrowdfundError::from(Rejection::NotInitialized),
            CrowdfundError::from(Rejection::ZeroTarget),
            CrowdfundError::from(Rejection::ZeroAmount),
            CrowdfundError::from(Rejection::Overflow),
            CrowdfundError::from(Rejection::IllegalOwner),
        ];
        let mut codes: Vec<u32> = errors.iter().map(|e| e.code()).collect();
        assert_eq!(codes[0], 0);
        assert_eq!(codes[3], 3);
        assert_eq!(codes[4], 4);
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }
}
