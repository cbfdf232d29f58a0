//! Campaign state machine as the program executes it.
//!
//! The processor never mutates accounts. It checks every precondition
//! against a read-only view of the instruction's accounts and returns the
//! ordered [`Effect`]s the host applies as one atomic unit:
//!
//! ```text
//! Absent --Initialize--> Live --Donate--> Live --Withdraw--> Absent
//! ```

use std::slice::Iter;

use serde::{Deserialize, Serialize};

use crate::error::{CrowdfundError, Rejection};
use crate::instruction::CampaignInstruction;
use crate::pda::{
    find_campaign_address, find_vault_address, verify_campaign_address, AddressDeriver,
    CAMPAIGN_SEED, VAULT_SEED,
};
use crate::pubkey::{system_program, Pubkey};
use crate::rent::Rent;
use crate::state::{decode_description, CampaignRecord, DESCRIPTION_LEN};

/// Read-only view of one account passed to an instruction.
#[derive(Clone, Copy, Debug)]
pub struct AccountView<'a> {
    pub key: Pubkey,
    pub is_signer: bool,
    pub is_writable: bool,
    pub lamports: u64,
    pub owner: Pubkey,
    pub data: &'a [u8],
}

impl AccountView<'_> {
    /// No lamports and no data: the slot has never been created or was closed.
    pub fn is_empty(&self) -> bool {
        self.lamports == 0 && self.data.is_empty()
    }
}

/// A state change requested by the program.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    /// Allocate `space` bytes at a program address, funded by `funder`.
    /// `seeds` (bump included) must re-derive `address`.
    CreateAccount {
        address: Pubkey,
        funder: Pubkey,
        lamports: u64,
        space: usize,
        owner: Pubkey,
        seeds: Vec<Vec<u8>>,
    },
    Transfer {
        from: Pubkey,
        to: Pubkey,
        lamports: u64,
    },
    WriteData {
        address: Pubkey,
        data: Vec<u8>,
    },
    /// Move every lamport to `beneficiary` and delete the account.
    CloseAccount {
        address: Pubkey,
        beneficiary: Pubkey,
    },
    /// Program log line.
    Log { message: String },
}

pub struct Processor<'a, D: ?Sized> {
    program_id: Pubkey,
    deriver: &'a D,
    rent: Rent,
}

impl<'a, D: AddressDeriver + ?Sized> Processor<'a, D> {
    pub fn new(program_id: Pubkey, deriver: &'a D, rent: Rent) -> Self {
        Self {
            program_id,
            deriver,
            rent,
        }
    }

    pub fn program_id(&self) -> &Pubkey {
        &self.program_id
    }

    pub fn process(
        &self,
        accounts: &[AccountView<'_>],
        instruction_data: &[u8],
    ) -> Result<Vec<Effect>, CrowdfundError> {
        match CampaignInstruction::unpack(instruction_data)? {
            CampaignInstruction::Initialize {
                target,
                description,
            } => self.process_initialize(accounts, target, &description),
            CampaignInstruction::Donate { amount } => self.process_donate(accounts, amount),
            CampaignInstruction::Withdraw => self.process_withdraw(accounts),
        }
    }

    fn process_initialize(
        &self,
        accounts: &[AccountView<'_>],
        target: u64,
        description: &[u8; DESCRIPTION_LEN],
    ) -> Result<Vec<Effect>, CrowdfundError> {
        let iter = &mut accounts.iter();
        let authority = next_account(iter)?;
        let campaign = next_account(iter)?;
        let vault = next_account(iter)?;
        expect_system_program(next_account(iter)?)?;

        if !authority.is_signer {
            return Err(Rejection::MissingSignature.into());
        }
        if target == 0 {
            return Err(Rejection::ZeroTarget.into());
        }
        let description =
            decode_description(description).map_err(|_| CrowdfundError::InvalidInstruction)?;

        let (campaign_pda, campaign_bump) =
            find_campaign_address(self.deriver, &self.program_id, &authority.key)?;
        expect_address(&campaign_pda, campaign)?;
        if !campaign.is_empty() {
            return Err(Rejection::AlreadyInitialized.into());
        }

        let (vault_pda, vault_bump) =
            find_vault_address(self.deriver, &self.program_id, &campaign_pda)?;
        expect_address(&vault_pda, vault)?;
        if !vault.is_empty() {
            return Err(Rejection::AlreadyInitialized.into());
        }

        let record = CampaignRecord {
            is_initialized: true,
            authority: authority.key,
            vault: vault_pda,
            description,
            target,
            amount_raised: 0,
            bump: campaign_bump,
        };

        Ok(vec![
            Effect::Log {
                message: "Instruction: Initialize fundraiser campaign".into(),
            },
            Effect::CreateAccount {
                address: campaign_pda,
                funder: authority.key,
                lamports: self.rent.minimum_balance(CampaignRecord::LEN),
                space: CampaignRecord::LEN,
                owner: self.program_id,
                seeds: vec![
                    CAMPAIGN_SEED.to_vec(),
                    authority.key.as_ref().to_vec(),
                    vec![campaign_bump],
                ],
            },
            Effect::CreateAccount {
                address: vault_pda,
                funder: authority.key,
                lamports: self.rent.minimum_balance(0),
                space: 0,
                owner: self.program_id,
                seeds: vec![
                    VAULT_SEED.to_vec(),
                    campaign_pda.as_ref().to_vec(),
                    vec![vault_bump],
                ],
            },
            Effect::WriteData {
                address: campaign_pda,
                data: record.pack()?.to_vec(),
            },
        ])
    }

    fn process_donate(
        &self,
        accounts: &[AccountView<'_>],
        amount: u64,
    ) -> Result<Vec<Effect>, CrowdfundError> {
        let iter = &mut accounts.iter();
        let donor = next_account(iter)?;
        let campaign = next_account(iter)?;
        let vault = next_account(iter)?;
        expect_system_program(next_account(iter)?)?;

        if !donor.is_signer {
            return Err(Rejection::MissingSignature.into());
        }
        if amount == 0 {
            return Err(Rejection::ZeroAmount.into());
        }
        let mut record = self.load_campaign(campaign, vault)?;
        record.amount_raised = record
            .amount_raised
            .checked_add(amount)
            .ok_or(Rejection::Overflow)?;

        Ok(vec![
            Effect::Log {
                message: "Instruction: Donate".into(),
            },
            Effect::Transfer {
                from: donor.key,
                to: vault.key,
                lamports: amount,
            },
            Effect::WriteData {
                address: campaign.key,
                data: record.pack()?.to_vec(),
            },
        ])
    }

    fn process_withdraw(&self, accounts: &[AccountView<'_>]) -> Result<Vec<Effect>, CrowdfundError> {
        let iter = &mut accounts.iter();
        let authority = next_account(iter)?;
        let campaign = next_account(iter)?;
        let vault = next_account(iter)?;

        if !authority.is_signer {
            return Err(Rejection::MissingSignature.into());
        }
        let record = self.load_campaign(campaign, vault)?;
        if record.authority != authority.key {
            return Err(Rejection::WrongAuthority.into());
        }

        Ok(vec![
            Effect::Log {
                message: "Withdrawing...".into(),
            },
            Effect::CloseAccount {
                address: vault.key,
                beneficiary: authority.key,
            },
            Effect::CloseAccount {
                address: campaign.key,
                beneficiary: authority.key,
            },
        ])
    }

    /// Decode a live record and check that both it and its vault sit at the
    /// addresses their seeds derive.
    fn load_campaign(
        &self,
        campaign: &AccountView<'_>,
        vault: &AccountView<'_>,
    ) -> Result<CampaignRecord, CrowdfundError> {
        if campaign.is_empty() {
            return Err(Rejection::NotInitialized.into());
        }
        if campaign.owner != self.program_id {
            return Err(Rejection::IllegalOwner.into());
        }
        let record = CampaignRecord::unpack_strict(campaign.data)?;
        if !record.is_initialized {
            return Err(Rejection::NotInitialized.into());
        }
        verify_campaign_address(
            self.deriver,
            &self.program_id,
            &record.authority,
            record.bump,
            &campaign.key,
        )?;
        if record.vault != vault.key {
            return Err(CrowdfundError::AddressMismatch {
                expected: record.vault,
                actual: vault.key,
            });
        }
        if vault.is_empty() {
            return Err(Rejection::NotInitialized.into());
        }
        if vault.owner != self.program_id {
            return Err(Rejection::IllegalOwner.into());
        }
        Ok(record)
    }
}

fn next_account<'a, 'b>(
    iter: &mut Iter<'a, AccountView<'b>>,
) -> Result<&'a AccountView<'b>, CrowdfundError> {
    iter.next().ok_or(CrowdfundError::NotEnoughAccountKeys)
}

fn expect_address(expected: &Pubkey, account: &AccountView<'_>) -> Result<(), CrowdfundError> {
    if expected != &account.key {
        return Err(CrowdfundError::AddressMismatch {
            expected: *expected,
            actual: account.key,
        });
    }
    Ok(())
}

fn expect_system_program(account: &AccountView<'_>) -> Result<(), CrowdfundError> {
    expect_address(&system_program::ID, account)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pda::{CampaignAddresses, Sha256Deriver};
    use crate::state::AMOUNT_RAISED_OFFSET;

    const PROGRAM: Pubkey = Pubkey::new_from_array([9u8; 32]);
    const AUTHORITY: Pubkey = Pubkey::new_from_array([1u8; 32]);
    const DONOR: Pubkey = Pubkey::new_from_array([4u8; 32]);

    fn processor() -> Processor<'static, Sha256Deriver> {
        Processor::new(PROGRAM, &Sha256Deriver, Rent::default())
    }

    fn addrs() -> CampaignAddresses {
        CampaignAddresses::derive(&Sha256Deriver, &PROGRAM, &AUTHORITY).unwrap()
    }

    fn view(key: Pubkey, is_signer: bool, lamports: u64, owner: Pubkey, data: &[u8]) -> AccountView<'_> {
        AccountView {
            key,
            is_signer,
            is_writable: true,
            lamports,
            owner,
            data,
        }
    }

    fn system() -> AccountView<'static> {
        AccountView {
            key: system_program::ID,
            is_signer: false,
            is_writable: false,
            lamports: 1,
            owner: system_program::ID,
            data: &[],
        }
    }

    fn live_record(amount_raised: u64) -> Vec<u8> {
        let a = addrs();
        CampaignRecord {
            is_initialized: true,
            authority: AUTHORITY,
            vault: a.vault,
            description: "school".into(),
            target: 3,
            amount_raised,
            bump: a.campaign_bump,
        }
        .pack()
        .unwrap()
        .to_vec()
    }

    fn init_data(target: u64) -> Vec<u8> {
        CampaignInstruction::initialize(target, "school").unwrap().pack()
    }

    #[test]
    fn initialize_creates_record_and_vault() {
        let a = addrs();
        let accounts = [
            view(AUTHORITY, true, 10_000_000_000, system_program::ID, &[]),
            view(a.campaign, false, 0, system_program::ID, &[]),
            view(a.vault, false, 0, system_program::ID, &[]),
            system(),
        ];
        let effects = processor().process(&accounts, &init_data(3)).unwrap();
        assert_eq!(effects.len(), 4);
        match &effects[1] {
            Effect::CreateAccount {
                address,
                space,
                owner,
                seeds,
                lamports,
                ..
            } => {
                assert_eq!(address, &a.campaign);
                assert_eq!(*space, CampaignRecord::LEN);
                assert_eq!(owner, &PROGRAM);
                assert_eq!(seeds[2], vec![a.campaign_bump]);
                assert_eq!(*lamports, Rent::default().minimum_balance(CampaignRecord::LEN));
            }
            other => panic!("unexpected effect {other:?}"),
        }
        match &effects[3] {
            Effect::WriteData { address, data } => {
                assert_eq!(address, &a.campaign);
                let record = CampaignRecord::unpack_strict(data).unwrap();
                assert!(record.is_initialized);
                assert_eq!(record.amount_raised, 0);
                assert_eq!(record.vault, a.vault);
                assert_eq!(record.bump, a.campaign_bump);
                assert_eq!(record.description, "school");
            }
            other => panic!("unexpected effect {other:?}"),
        }
    }

    #[test]
    fn initialize_preconditions() {
        let a = addrs();
        let p = processor();
        let mut accounts = [
            view(AUTHORITY, false, 10, system_program::ID, &[]),
            view(a.campaign, false, 0, system_program::ID, &[]),
            view(a.vault, false, 0, system_program::ID, &[]),
            system(),
        ];
        assert_eq!(
            p.process(&accounts, &init_data(3)).unwrap_err(),
            CrowdfundError::from(Rejection::MissingSignature)
        );
        accounts[0].is_signer = true;
        assert_eq!(
            p.process(&accounts, &init_data(0)).unwrap_err(),
            CrowdfundError::from(Rejection::ZeroTarget)
        );
        let existing = live_record(0);
        accounts[1] = view(a.campaign, false, 5, PROGRAM, &existing);
        assert_eq!(
            p.process(&accounts, &init_data(3)).unwrap_err(),
            CrowdfundError::from(Rejection::AlreadyInitialized)
        );
        accounts[1] = view(DONOR, false, 0, system_program::ID, &[]);
        assert!(matches!(
            p.process(&accounts, &init_data(3)),
            Err(CrowdfundError::AddressMismatch { .. })
        ));
        assert_eq!(
            p.process(&accounts[..2], &init_data(3)).unwrap_err(),
            CrowdfundError::NotEnoughAccountKeys
        );
    }

    #[test]
    fn donate_increments_amount_raised() {
        let a = addrs();
        let data = live_record(5);
        let accounts = [
            view(DONOR, true, 100, system_program::ID, &[]),
            view(a.campaign, false, 10, PROGRAM, &data),
            view(a.vault, false, 10, PROGRAM, &[]),
            system(),
        ];
        let effects = processor()
            .process(&accounts, &CampaignInstruction::Donate { amount: 7 }.pack())
            .unwrap();
        assert_eq!(
            effects[1],
            Effect::Transfer {
                from: DONOR,
                to: a.vault,
                lamports: 7
            }
        );
        match &effects[2] {
            Effect::WriteData { data: written, .. } => {
                let before = CampaignRecord::unpack(&data).unwrap();
                let after = CampaignRecord::unpack(written).unwrap();
                assert_eq!(
                    after,
                    CampaignRecord {
                        amount_raised: 12,
                        ..before
                    }
                );
                // Only the amount_raised bytes move.
                assert_eq!(written[..AMOUNT_RAISED_OFFSET], data[..AMOUNT_RAISED_OFFSET]);
                assert_eq!(written[AMOUNT_RAISED_OFFSET + 8..], data[AMOUNT_RAISED_OFFSET + 8..]);
            }
            other => panic!("unexpected effect {other:?}"),
        }
    }

    #[test]
    fn donate_past_target_is_accepted() {
        let a = addrs();
        let data = live_record(3);
        let accounts = [
            view(DONOR, true, 100, system_program::ID, &[]),
            view(a.campaign, false, 10, PROGRAM, &data),
            view(a.vault, false, 10, PROGRAM, &[]),
            system(),
        ];
        assert!(processor()
            .process(&accounts, &CampaignInstruction::Donate { amount: 50 }.pack())
            .is_ok());
    }

    #[test]
    fn donate_preconditions() {
        let a = addrs();
        let p = processor();
        let data = live_record(u64::MAX);
        let mut accounts = [
            view(DONOR, true, 100, system_program::ID, &[]),
            view(a.campaign, false, 10, PROGRAM, &data),
            view(a.vault, false, 10, PROGRAM, &[]),
            system(),
        ];
        let donate = |amount| CampaignInstruction::Donate { amount }.pack();
        assert_eq!(
            p.process(&accounts, &donate(1)).unwrap_err(),
            CrowdfundError::from(Rejection::Overflow)
        );
        assert_eq!(
            p.process(&accounts, &donate(0)).unwrap_err(),
            CrowdfundError::from(Rejection::ZeroAmount)
        );
        accounts[0].is_signer = false;
        assert_eq!(
            p.process(&accounts, &donate(1)).unwrap_err(),
            CrowdfundError::from(Rejection::MissingSignature)
        );
        accounts[0].is_signer = true;
        accounts[2].key = DONOR;
        assert!(matches!(
            p.process(&accounts, &donate(1)),
            Err(CrowdfundError::AddressMismatch { .. })
        ));
        accounts[1] = view(a.campaign, false, 0, system_program::ID, &[]);
        assert_eq!(
            p.process(&accounts, &donate(1)).unwrap_err(),
            CrowdfundError::from(Rejection::NotInitialized)
        );
    }

    #[test]
    fn donate_to_foreign_owned_record_is_rejected() {
        let a = addrs();
        let data = live_record(0);
        let accounts = [
            view(DONOR, true, 100, system_program::ID, &[]),
            view(a.campaign, false, 10, DONOR, &data),
            view(a.vault, false, 10, PROGRAM, &[]),
            system(),
        ];
        assert_eq!(
            processor()
                .process(&accounts, &CampaignInstruction::Donate { amount: 1 }.pack())
                .unwrap_err(),
            CrowdfundError::from(Rejection::IllegalOwner)
        );
    }

    #[test]
    fn withdraw_closes_vault_then_record() {
        let a = addrs();
        let data = live_record(3);
        let accounts = [
            view(AUTHORITY, true, 100, system_program::ID, &[]),
            view(a.campaign, false, 10, PROGRAM, &data),
            view(a.vault, false, 10, PROGRAM, &[]),
        ];
        let effects = processor()
            .process(&accounts, &CampaignInstruction::Withdraw.pack())
            .unwrap();
        assert_eq!(
            &effects[1..],
            &[
                Effect::CloseAccount {
                    address: a.vault,
                    beneficiary: AUTHORITY
                },
                Effect::CloseAccount {
                    address: a.campaign,
                    beneficiary: AUTHORITY
                },
            ]
        );
    }

    #[test]
    fn withdraw_requires_the_stored_authority() {
        let a = addrs();
        let data = live_record(3);
        let accounts = [
            view(DONOR, true, 100, system_program::ID, &[]),
            view(a.campaign, false, 10, PROGRAM, &data),
            view(a.vault, false, 10, PROGRAM, &[]),
        ];
        assert_eq!(
            processor()
                .process(&accounts, &CampaignInstruction::Withdraw.pack())
                .unwrap_err(),
            CrowdfundError::from(Rejection::WrongAuthority)
        );
    }

    #[test]
    fn forged_record_location_is_detected() {
        // A valid record copied to an address its seeds do not derive.
        let a = addrs();
        let data = live_record(0);
        let accounts = [
            view(AUTHORITY, true, 100, system_program::ID, &[]),
            view(DONOR, false, 10, PROGRAM, &data),
            view(a.vault, false, 10, PROGRAM, &[]),
        ];
        assert_eq!(
            processor()
                .process(&accounts, &CampaignInstruction::Withdraw.pack())
                .unwrap_err(),
            CrowdfundError::AddressMismatch {
                expected: a.campaign,
                actual: DONOR
            }
        );
    }
}
