use std::collections::BTreeMap;

use crowdfund_core::instruction::AccountMeta;
use crowdfund_core::pda::AddressDeriver;
use crowdfund_core::processor::{AccountView, Effect};
use crowdfund_core::pubkey::system_program;
use crowdfund_core::{CrowdfundError, Pubkey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type Lamports = u64;

pub const LAMPORTS_PER_SOL: Lamports = 1_000_000_000;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient funds in account {account}")]
    InsufficientFunds { account: Pubkey },
    #[error("account {account} already in use")]
    AccountInUse { account: Pubkey },
    #[error("unknown account {account}")]
    UnknownAccount { account: Pubkey },
    #[error("account {account} is not writable in this instruction")]
    ReadonlyAccount { account: Pubkey },
    #[error("account {account} did not sign")]
    MissingSignature { account: Pubkey },
    #[error("program {program} may not modify account {account}")]
    IllegalOwner { program: Pubkey, account: Pubkey },
    #[error("seeds do not derive account {account}")]
    SeedMismatch { account: Pubkey },
    #[error("data for {account} is {actual} bytes, account holds {expected}")]
    InvalidRealloc {
        account: Pubkey,
        expected: usize,
        actual: usize,
    },
    #[error("custom program error {}: {0}", .0.code())]
    Program(#[from] CrowdfundError),
}

/// One account slot. Absent slots are simply missing from the ledger.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub lamports: Lamports,
    #[serde(with = "crate::transaction::serde_bytes")]
    pub data: Vec<u8>,
    pub owner: Pubkey,
}

impl Account {
    pub fn wallet(lamports: Lamports) -> Self {
        Self {
            lamports,
            data: Vec::new(),
            owner: system_program::ID,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SnapshotMetadata {
    pub height: u64,
    pub previous_transaction: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub meta: SnapshotMetadata,
    pub accounts: BTreeMap<Pubkey, Account>,
    pub events: Vec<LedgerEvent>,
    #[serde(with = "hex_array")]
    pub state_root: [u8; 32],
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    Airdrop {
        to: Pubkey,
        lamports: Lamports,
    },
    FeeCharged {
        payer: Pubkey,
        lamports: Lamports,
    },
    AccountCreated {
        address: Pubkey,
        owner: Pubkey,
        lamports: Lamports,
        space: usize,
    },
    Transfer {
        from: Pubkey,
        to: Pubkey,
        lamports: Lamports,
    },
    DataWritten {
        address: Pubkey,
        len: usize,
    },
    AccountClosed {
        address: Pubkey,
        beneficiary: Pubkey,
        lamports: Lamports,
    },
    ProgramLog {
        program: Pubkey,
        message: String,
    },
}

#[derive(Clone, Debug, Default)]
pub struct LedgerState {
    pub meta: SnapshotMetadata,
    pub accounts: BTreeMap<Pubkey, Account>,
    pub events: Vec<LedgerEvent>,
}

impl LedgerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn account(&self, address: &Pubkey) -> Option<&Account> {
        self.accounts.get(address)
    }

    /// Raw account bytes, `None` when the slot is absent.
    pub fn account_data(&self, address: &Pubkey) -> Option<&[u8]> {
        self.account(address).map(|a| a.data.as_slice())
    }

    pub fn balance(&self, address: &Pubkey) -> Lamports {
        self.account(address).map(|a| a.lamports).unwrap_or(0)
    }

    /// Faucet credit.
    pub fn airdrop(&mut self, to: &Pubkey, lamports: Lamports) {
        self.credit_account(to, lamports);
        self.events.push(LedgerEvent::Airdrop { to: *to, lamports });
    }

    pub fn credit_account(&mut self, account: &Pubkey, lamports: Lamports) {
        let entry = self
            .accounts
            .entry(*account)
            .or_insert_with(|| Account::wallet(0));
        entry.lamports += lamports;
    }

    pub fn debit_account(&mut self, account: &Pubkey, lamports: Lamports) -> Result<(), LedgerError> {
        let entry = self
            .accounts
            .get_mut(account)
            .ok_or(LedgerError::UnknownAccount { account: *account })?;
        if entry.lamports < lamports {
            return Err(LedgerError::InsufficientFunds { account: *account });
        }
        entry.lamports -= lamports;
        Ok(())
    }

    pub fn charge_fee(&mut self, payer: &Pubkey, lamports: Lamports) -> Result<(), LedgerError> {
        self.debit_account(payer, lamports)?;
        self.events.push(LedgerEvent::FeeCharged {
            payer: *payer,
            lamports,
        });
        Ok(())
    }

    /// Run `f` against a scratch copy and keep the result only if it
    /// succeeds, so a failure leaves no partial state behind.
    pub fn transact<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut LedgerState) -> Result<T, E>,
    {
        let mut scratch = self.clone();
        let out = f(&mut scratch)?;
        *self = scratch;
        Ok(out)
    }

    /// Read-only views of an instruction's accounts. Absent slots appear as
    /// empty system-owned accounts.
    pub fn views(&self, metas: &[AccountMeta]) -> Vec<AccountView<'_>> {
        metas
            .iter()
            .map(|meta| {
                let account = self.accounts.get(&meta.pubkey);
                AccountView {
                    key: meta.pubkey,
                    is_signer: meta.is_signer,
                    is_writable: meta.is_writable,
                    lamports: account.map(|a| a.lamports).unwrap_or(0),
                    owner: account.map(|a| a.owner).unwrap_or(system_program::ID),
                    data: account.map(|a| a.data.as_slice()).unwrap_or(&[]),
                }
            })
            .collect()
    }

    /// Apply the effects one program returned for one instruction, enforcing
    /// the host rules: only writable accounts change, system-owned accounts
    /// are debited only with their signature, program-owned accounts only by
    /// their owner, and program addresses are created only with seeds that
    /// derive them. Callers wrap this in [`LedgerState::transact`].
    pub fn apply_effects<D: AddressDeriver + ?Sized>(
        &mut self,
        program_id: &Pubkey,
        metas: &[AccountMeta],
        effects: Vec<Effect>,
        deriver: &D,
    ) -> Result<Vec<String>, LedgerError> {
        let access = AccessList { metas };
        let mut logs = Vec::new();
        for effect in effects {
            match effect {
                Effect::CreateAccount {
                    address,
                    funder,
                    lamports,
                    space,
                    owner,
                    seeds,
                } => {
                    access.writable(&address)?;
                    access.writable(&funder)?;
                    access.signer(&funder)?;
                    let seed_refs: Vec<&[u8]> = seeds.iter().map(Vec::as_slice).collect();
                    let derived = deriver
                        .create_program_address(&seed_refs, program_id)
                        .map_err(|_| LedgerError::SeedMismatch { account: address })?;
                    if derived != address {
                        return Err(LedgerError::SeedMismatch { account: address });
                    }
                    if self
                        .accounts
                        .get(&address)
                        .is_some_and(|a| a.lamports > 0 || !a.data.is_empty())
                    {
                        return Err(LedgerError::AccountInUse { account: address });
                    }
                    self.debit_system_account(&funder, lamports)?;
                    self.accounts.insert(
                        address,
                        Account {
                            lamports,
                            data: vec![0u8; space],
                            owner,
                        },
                    );
                    self.events.push(LedgerEvent::AccountCreated {
                        address,
                        owner,
                        lamports,
                        space,
                    });
                }
                Effect::Transfer { from, to, lamports } => {
                    access.writable(&from)?;
                    access.writable(&to)?;
                    let source_owner = self
                        .accounts
                        .get(&from)
                        .map(|a| a.owner)
                        .ok_or(LedgerError::UnknownAccount { account: from })?;
                    if source_owner == system_program::ID {
                        access.signer(&from)?;
                        self.debit_system_account(&from, lamports)?;
                    } else if &source_owner == program_id {
                        self.debit_account(&from, lamports)?;
                    } else {
                        return Err(LedgerError::IllegalOwner {
                            program: *program_id,
                            account: from,
                        });
                    }
                    self.credit_account(&to, lamports);
                    self.events.push(LedgerEvent::Transfer { from, to, lamports });
                }
                Effect::WriteData { address, data } => {
                    access.writable(&address)?;
                    let account = self.owned_account_mut(program_id, &address)?;
                    if account.data.len() != data.len() {
                        return Err(LedgerError::InvalidRealloc {
                            account: address,
                            expected: account.data.len(),
                            actual: data.len(),
                        });
                    }
                    let len = data.len();
                    account.data = data;
                    self.events.push(LedgerEvent::DataWritten { address, len });
                }
                Effect::CloseAccount {
                    address,
                    beneficiary,
                } => {
                    access.writable(&address)?;
                    access.writable(&beneficiary)?;
                    self.owned_account_mut(program_id, &address)?;
                    let closed = self
                        .accounts
                        .remove(&address)
                        .ok_or(LedgerError::UnknownAccount { account: address })?;
                    self.credit_account(&beneficiary, closed.lamports);
                    self.events.push(LedgerEvent::AccountClosed {
                        address,
                        beneficiary,
                        lamports: closed.lamports,
                    });
                }
                Effect::Log { message } => {
                    self.events.push(LedgerEvent::ProgramLog {
                        program: *program_id,
                        message: message.clone(),
                    });
                    logs.push(format!("Program log: {message}"));
                }
            }
        }
        Ok(logs)
    }

    fn debit_system_account(&mut self, account: &Pubkey, lamports: Lamports) -> Result<(), LedgerError> {
        let entry = self
            .accounts
            .get(account)
            .ok_or(LedgerError::InsufficientFunds { account: *account })?;
        if !entry.data.is_empty() || entry.owner != system_program::ID {
            return Err(LedgerError::IllegalOwner {
                program: system_program::ID,
                account: *account,
            });
        }
        self.debit_account(account, lamports)
    }

    fn owned_account_mut(
        &mut self,
        program_id: &Pubkey,
        address: &Pubkey,
    ) -> Result<&mut Account, LedgerError> {
        let account = self
            .accounts
            .get_mut(address)
            .ok_or(LedgerError::UnknownAccount { account: *address })?;
        if &account.owner != program_id {
            return Err(LedgerError::IllegalOwner {
                program: *program_id,
                account: *address,
            });
        }
        Ok(account)
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            meta: self.meta.clone(),
            accounts: self.accounts.clone(),
            events: self.events.clone(),
            state_root: compute_merkle_root(&self.accounts),
        }
    }
}

struct AccessList<'a> {
    metas: &'a [AccountMeta],
}

impl AccessList<'_> {
    fn writable(&self, account: &Pubkey) -> Result<(), LedgerError> {
        if self
            .metas
            .iter()
            .any(|m| &m.pubkey == account && m.is_writable)
        {
            Ok(())
        } else {
            Err(LedgerError::ReadonlyAccount { account: *account })
        }
    }

    fn signer(&self, account: &Pubkey) -> Result<(), LedgerError> {
        if self.metas.iter().any(|m| &m.pubkey == account && m.is_signer) {
            Ok(())
        } else {
            Err(LedgerError::MissingSignature { account: *account })
        }
    }
}

fn compute_merkle_root(accounts: &BTreeMap<Pubkey, Account>) -> [u8; 32] {
    let mut level: Vec<[u8; 32]> = accounts
        .iter()
        .map(|(address, account)| account_leaf(address, account))
        .collect();
    if level.is_empty() {
        return [0u8; 32];
    }
    // An unpaired node moves up a level unchanged.
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair.get(1) {
                Some(right) => interior_node(&pair[0], right),
                None => pair[0],
            })
            .collect();
    }
    level[0]
}

fn account_leaf(address: &Pubkey, account: &Account) -> [u8; 32] {
    Sha256::new()
        .chain_update([0x00u8])
        .chain_update(address.as_ref())
        .chain_update(account.owner.as_ref())
        .chain_update(account.lamports.to_le_bytes())
        .chain_update((account.data.len() as u64).to_le_bytes())
        .chain_update(&account.data)
        .finalize()
        .into()
}

fn interior_node(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    Sha256::new()
        .chain_update([0x01u8])
        .chain_update(left)
        .chain_update(right)
        .finalize()
        .into()
}

mod hex_array {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let bytes = hex::decode(&encoded).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| D::Error::custom("state root must be 32 bytes"))
    }
}
