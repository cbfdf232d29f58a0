//! Transaction execution for the in-memory host.
//!
//! A transaction is verified, charged, and then executed instruction by
//! instruction on a scratch copy of the ledger. Nothing is committed unless
//! every instruction succeeds.

use std::collections::BTreeSet;

use crowdfund_core::instruction::Instruction;
use crowdfund_core::pda::{AddressDeriver, Sha256Deriver};
use crowdfund_core::processor::Processor;
use crowdfund_core::Pubkey;
use ed25519_dalek::SigningKey;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::config::HostConfig;
use crate::ledger::{Lamports, LedgerError, LedgerState};
use crate::transaction::{Message, Transaction, VerificationError};

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Verification(#[from] VerificationError),
    #[error("transaction already processed")]
    DuplicateTransaction,
    #[error("transaction has no instructions")]
    EmptyTransaction,
    #[error("fee payer cannot pay {fee} lamports: {source}")]
    Fee {
        fee: Lamports,
        #[source]
        source: LedgerError,
    },
    #[error("instruction {index} failed: {source}")]
    Instruction {
        index: usize,
        #[source]
        source: LedgerError,
    },
    #[error("unknown program {0}")]
    UnknownProgram(Pubkey),
    #[error("airdrop of {requested} lamports exceeds faucet limit {limit}")]
    FaucetLimit { requested: Lamports, limit: Lamports },
}

impl RuntimeError {
    /// Custom program error code, when the program itself rejected the
    /// transaction.
    pub fn program_error_code(&self) -> Option<u32> {
        match self {
            RuntimeError::Instruction {
                source: LedgerError::Program(err),
                ..
            } => Some(err.code()),
            _ => None,
        }
    }
}

/// Outcome of a committed transaction.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Receipt {
    pub signature: String,
    pub height: u64,
    pub fee: Lamports,
    pub logs: Vec<String>,
}

/// The collaborator the harness drives: instruction submission, raw account
/// reads, balances and a faucet.
pub trait Host {
    fn program_id(&self) -> Pubkey;

    fn deriver(&self) -> &dyn AddressDeriver;

    /// Sign `instructions` with `payer` plus `signers` and execute them
    /// atomically.
    fn submit(
        &mut self,
        instructions: Vec<Instruction>,
        payer: &SigningKey,
        signers: &[&SigningKey],
    ) -> Result<Receipt, RuntimeError>;

    /// Raw bytes of the account, `None` when the slot is absent.
    fn account_data(&self, address: &Pubkey) -> Option<Vec<u8>>;

    fn balance(&self, address: &Pubkey) -> Lamports;

    /// Largest amount a single [`Host::airdrop`] may request.
    fn faucet_limit(&self) -> Lamports;

    fn airdrop(&mut self, to: &Pubkey, lamports: Lamports) -> Result<(), RuntimeError>;
}

pub struct Runtime<D = Sha256Deriver> {
    config: HostConfig,
    ledger: LedgerState,
    deriver: D,
    processed: BTreeSet<[u8; 32]>,
}

impl Runtime<Sha256Deriver> {
    pub fn new(config: HostConfig) -> Self {
        Self::with_deriver(config, Sha256Deriver)
    }
}

impl<D: AddressDeriver> Runtime<D> {
    pub fn with_deriver(config: HostConfig, deriver: D) -> Self {
        Self {
            config,
            ledger: LedgerState::new(),
            deriver,
            processed: BTreeSet::new(),
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn ledger(&self) -> &LedgerState {
        &self.ledger
    }

    pub fn process_transaction(&mut self, tx: &Transaction) -> Result<Receipt, RuntimeError> {
        if tx.message.instructions.is_empty() {
            return Err(RuntimeError::EmptyTransaction);
        }
        tx.verify()?;
        let digest = tx.message.digest();
        if self.processed.contains(&digest) {
            return Err(RuntimeError::DuplicateTransaction);
        }

        let fee = self
            .config
            .lamports_per_signature
            .saturating_mul(tx.signatures.len() as u64);
        let signature = tx.id();
        let config = &self.config;
        let deriver = &self.deriver;

        let receipt = self.ledger.transact(|scratch| {
            scratch
                .charge_fee(&tx.message.fee_payer, fee)
                .map_err(|source| RuntimeError::Fee { fee, source })?;
            let mut logs = Vec::new();
            for (index, ix) in tx.message.instructions.iter().enumerate() {
                if ix.program_id != config.program_id {
                    return Err(RuntimeError::UnknownProgram(ix.program_id));
                }
                logs.push(format!("Program {} invoke [1]", ix.program_id));
                let ix_logs = execute(scratch, config, deriver, ix)
                    .map_err(|source| RuntimeError::Instruction { index, source })?;
                logs.extend(ix_logs);
                logs.push(format!("Program {} success", ix.program_id));
            }
            scratch.meta.height += 1;
            scratch.meta.previous_transaction = Some(signature.clone());
            Ok(Receipt {
                signature: signature.clone(),
                height: scratch.meta.height,
                fee,
                logs,
            })
        })?;
        self.processed.insert(digest);
        Ok(receipt)
    }
}

fn execute<D: AddressDeriver>(
    ledger: &mut LedgerState,
    config: &HostConfig,
    deriver: &D,
    ix: &Instruction,
) -> Result<Vec<String>, LedgerError> {
    let processor = Processor::new(config.program_id, deriver, config.rent);
    let effects = {
        let views = ledger.views(&ix.accounts);
        processor.process(&views, &ix.data)?
    };
    ledger.apply_effects(&config.program_id, &ix.accounts, effects, deriver)
}

impl<D: AddressDeriver> Host for Runtime<D> {
    fn program_id(&self) -> Pubkey {
        self.config.program_id
    }

    fn deriver(&self) -> &dyn AddressDeriver {
        &self.deriver
    }

    fn submit(
        &mut self,
        instructions: Vec<Instruction>,
        payer: &SigningKey,
        signers: &[&SigningKey],
    ) -> Result<Receipt, RuntimeError> {
        let message = Message::new(payer.verifying_key().into(), OsRng.next_u64(), instructions);
        let mut keys = vec![payer];
        keys.extend_from_slice(signers);
        let tx = Transaction::new_signed(message, &keys)?;
        self.process_transaction(&tx)
    }

    fn account_data(&self, address: &Pubkey) -> Option<Vec<u8>> {
        self.ledger.account_data(address).map(<[u8]>::to_vec)
    }

    fn balance(&self, address: &Pubkey) -> Lamports {
        self.ledger.balance(address)
    }

    fn faucet_limit(&self) -> Lamports {
        self.config.faucet_limit
    }

    fn airdrop(&mut self, to: &Pubkey, lamports: Lamports) -> Result<(), RuntimeError> {
        if lamports > self.config.faucet_limit {
            return Err(RuntimeError::FaucetLimit {
                requested: lamports,
                limit: self.config.faucet_limit,
            });
        }
        self.ledger.airdrop(to, lamports);
        Ok(())
    }
}
