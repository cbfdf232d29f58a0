//! End-to-end campaign scenario: initialize, a run of donations, withdraw.
//!
//! Every step reads the record back through the host and checks what the
//! protocol promises, so the same driver works against any [`Host`].

use crowdfund_core::instruction::{donate, initialize_derived, withdraw};
use crowdfund_core::pda::CampaignAddresses;
use crowdfund_core::state::CampaignRecord;
use crowdfund_core::{CrowdfundError, Pubkey};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::ledger::{Lamports, LAMPORTS_PER_SOL};
use crate::runtime::{Host, Receipt, RuntimeError};

pub const DEFAULT_DESCRIPTION: &str = "Raising funds for a new Macbook for school";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScenarioConfig {
    pub target: Lamports,
    pub description: String,
    pub donations: Vec<Lamports>,
    /// Faucet credit for the authority before initializing.
    pub authority_funding: Lamports,
    /// Faucet credit for each donor on top of its donation.
    pub donor_funding: Lamports,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            target: 3 * LAMPORTS_PER_SOL,
            description: DEFAULT_DESCRIPTION.to_string(),
            donations: vec![LAMPORTS_PER_SOL; 3],
            authority_funding: 2 * LAMPORTS_PER_SOL,
            donor_funding: LAMPORTS_PER_SOL,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("host rejected the scenario: {0}")]
    Host(#[from] RuntimeError),
    #[error(transparent)]
    Protocol(#[from] CrowdfundError),
    #[error("scenario check failed: {0}")]
    Assertion(String),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DonationStep {
    pub donor: Pubkey,
    pub amount: Lamports,
    pub amount_raised: u64,
    pub vault_balance: Lamports,
    pub signature: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WithdrawStep {
    pub authority_before: Lamports,
    pub authority_after: Lamports,
    pub reclaimed: Lamports,
    pub fee: Lamports,
    pub signature: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScenarioReport {
    pub program_id: Pubkey,
    pub authority: Pubkey,
    pub campaign: Pubkey,
    pub campaign_bump: u8,
    pub vault: Pubkey,
    pub vault_bump: u8,
    pub initial: CampaignRecord,
    pub donations: Vec<DonationStep>,
    pub before_withdraw: CampaignRecord,
    pub withdraw: WithdrawStep,
    pub logs: Vec<String>,
}

macro_rules! ensure {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err(HarnessError::Assertion(format!($($arg)+)));
        }
    };
}

pub fn run_scenario<H: Host + ?Sized>(
    host: &mut H,
    config: &ScenarioConfig,
) -> Result<ScenarioReport, HarnessError> {
    let program_id = host.program_id();
    let authority = SigningKey::generate(&mut OsRng);
    let authority_key = Pubkey::from(authority.verifying_key());
    fund(host, &authority_key, config.authority_funding)?;

    let (ix, addrs) = initialize_derived(
        host.deriver(),
        &program_id,
        &authority_key,
        config.target,
        &config.description,
    )?;
    let mut logs = Vec::new();
    let receipt = host.submit(vec![ix], &authority, &[])?;
    logs.extend(receipt.logs);

    let initial = read_record(host, &addrs.campaign)?;
    ensure!(initial.is_initialized, "campaign not initialized");
    ensure!(
        initial.amount_raised == 0,
        "fresh campaign reports {} raised",
        initial.amount_raised
    );
    ensure!(
        initial.description == config.description,
        "description read back as {:?}",
        initial.description
    );
    ensure!(initial.target == config.target, "target read back as {}", initial.target);
    ensure!(initial.authority == authority_key, "record names another authority");
    ensure!(initial.vault == addrs.vault, "record names another vault");
    ensure!(initial.bump == addrs.campaign_bump, "record bump {} differs", initial.bump);
    ensure!(
        host.account_data(&addrs.vault).is_some(),
        "vault account was not created"
    );

    let mut donations = Vec::with_capacity(config.donations.len());
    let mut raised: u64 = 0;
    for &amount in &config.donations {
        let step = donate_once(host, &addrs, &initial, amount, config.donor_funding)?;
        raised = raised.checked_add(amount).ok_or_else(|| {
            HarnessError::Assertion("donation total overflows".to_string())
        })?;
        ensure!(
            step.0.amount_raised == raised,
            "after donating {amount} the record shows {} raised, expected {raised}",
            step.0.amount_raised
        );
        logs.extend(step.1.logs);
        donations.push(step.0);
    }

    let before_withdraw = read_record(host, &addrs.campaign)?;
    ensure_fixed_fields(&initial, &before_withdraw)?;
    let vault_balance = host.balance(&addrs.vault);
    let campaign_balance = host.balance(&addrs.campaign);
    let authority_before = host.balance(&authority_key);
    let receipt = host.submit(
        vec![withdraw(&program_id, &authority_key, &addrs.campaign, &addrs.vault)],
        &authority,
        &[],
    )?;
    let authority_after = host.balance(&authority_key);
    let reclaimed = vault_balance + campaign_balance;
    ensure!(
        authority_after + receipt.fee == authority_before + reclaimed,
        "authority moved from {authority_before} to {authority_after}, expected +{reclaimed} less fee {}",
        receipt.fee
    );
    ensure!(
        host.account_data(&addrs.campaign).is_none(),
        "campaign still present after withdraw"
    );
    ensure!(
        host.account_data(&addrs.vault).is_none(),
        "vault still present after withdraw"
    );
    logs.extend(receipt.logs);

    Ok(ScenarioReport {
        program_id,
        authority: authority_key,
        campaign: addrs.campaign,
        campaign_bump: addrs.campaign_bump,
        vault: addrs.vault,
        vault_bump: addrs.vault_bump,
        initial,
        donations,
        before_withdraw,
        withdraw: WithdrawStep {
            authority_before,
            authority_after,
            reclaimed,
            fee: receipt.fee,
            signature: receipt.signature,
        },
        logs,
    })
}

/// Credit `lamports` through as many airdrops as the faucet limit requires.
fn fund<H: Host + ?Sized>(
    host: &mut H,
    to: &Pubkey,
    lamports: Lamports,
) -> Result<(), HarnessError> {
    let limit = host.faucet_limit();
    if limit == 0 && lamports > 0 {
        return Err(HarnessError::Assertion(
            "host faucet grants nothing, cannot fund scenario keys".to_string(),
        ));
    }
    let mut remaining = lamports;
    while remaining > 0 {
        let grant = remaining.min(limit);
        host.airdrop(to, grant)?;
        remaining -= grant;
    }
    Ok(())
}

/// Everything but `amount_raised` is written once at initialize.
fn ensure_fixed_fields(
    initial: &CampaignRecord,
    current: &CampaignRecord,
) -> Result<(), HarnessError> {
    let expected = CampaignRecord {
        amount_raised: current.amount_raised,
        ..initial.clone()
    };
    ensure!(
        *current == expected,
        "fixed campaign fields changed: {initial:?} became {current:?}"
    );
    Ok(())
}

fn donate_once<H: Host + ?Sized>(
    host: &mut H,
    addrs: &CampaignAddresses,
    initial: &CampaignRecord,
    amount: Lamports,
    funding: Lamports,
) -> Result<(DonationStep, Receipt), HarnessError> {
    let donor = SigningKey::generate(&mut OsRng);
    let donor_key = Pubkey::from(donor.verifying_key());
    fund(host, &donor_key, amount.saturating_add(funding))?;
    let vault_before = host.balance(&addrs.vault);
    let ix = donate(&host.program_id(), &donor_key, &addrs.campaign, &addrs.vault, amount);
    let receipt = host.submit(vec![ix], &donor, &[])?;
    let vault_balance = host.balance(&addrs.vault);
    ensure!(
        vault_balance == vault_before + amount,
        "vault grew by {} for a donation of {amount}",
        vault_balance.saturating_sub(vault_before)
    );
    let record = read_record(host, &addrs.campaign)?;
    ensure_fixed_fields(initial, &record)?;
    let step = DonationStep {
        donor: donor_key,
        amount,
        amount_raised: record.amount_raised,
        vault_balance,
        signature: receipt.signature.clone(),
    };
    Ok((step, receipt))
}

fn read_record<H: Host + ?Sized>(host: &H, address: &Pubkey) -> Result<CampaignRecord, HarnessError> {
    let data = host
        .account_data(address)
        .ok_or_else(|| HarnessError::Assertion(format!("account {address} is absent")))?;
    Ok(CampaignRecord::unpack_strict(&data)?)
}
