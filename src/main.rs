use std::path::PathBuf;

use base64::{engine::general_purpose, Engine as _};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use crowdfund_core::instruction::CampaignInstruction;
use crowdfund_core::pda::{CampaignAddresses, Sha256Deriver};
use crowdfund_core::state::{CampaignRecord, TagMode};
use crowdfund_core::{CrowdfundError, Pubkey};

mod config;
mod harness;
mod ledger;
mod runtime;
mod transaction;

use config::{ConfigError, HostConfig};
use harness::{run_scenario, HarnessError, ScenarioConfig, ScenarioReport};
use ledger::{LedgerSnapshot, LAMPORTS_PER_SOL};
use runtime::Runtime;

#[derive(Parser)]
#[command(name = "crowdfund", version, about = "Crowdfunding program wire tools")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Derive the campaign and vault addresses of an authority
    Derive {
        #[arg(long)]
        authority: Pubkey,
        #[arg(long)]
        program_id: Option<Pubkey>,
    },
    /// Print an instruction payload as hex
    EncodeIx {
        #[command(subcommand)]
        instruction: EncodeIx,
    },
    /// Decode a hex instruction payload
    DecodeIx {
        #[arg(long)]
        hex: String,
    },
    /// Decode raw campaign record bytes
    DecodeRecord(DecodeRecordArgs),
    /// Run initialize, donations and withdraw on the in-memory host
    Simulate(SimulateArgs),
}

#[derive(Subcommand)]
enum EncodeIx {
    Initialize {
        #[arg(long)]
        target: u64,
        #[arg(long)]
        description: String,
    },
    Donate {
        #[arg(long)]
        amount: u64,
    },
    Withdraw,
}

#[derive(Args)]
struct DecodeRecordArgs {
    #[arg(long, required_unless_present = "base64", conflicts_with = "base64")]
    hex: Option<String>,
    #[arg(long)]
    base64: Option<String>,
    /// Reject tag bytes other than 0 and 1
    #[arg(long)]
    strict: bool,
}

#[derive(Args)]
struct SimulateArgs {
    /// Host configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value_t = 3)]
    donations: usize,
    /// Lamports per donation
    #[arg(long, default_value_t = LAMPORTS_PER_SOL)]
    donation: u64,
    #[arg(long)]
    target: Option<u64>,
    #[arg(long)]
    description: Option<String>,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Protocol(#[from] CrowdfundError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Harness(#[from] HarnessError),
    #[error("invalid --{flag}: {reason}")]
    Input { flag: &'static str, reason: String },
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Custom error code when the program itself rejected an instruction.
    fn program_error_code(&self) -> Option<u32> {
        match self {
            CliError::Harness(HarnessError::Host(err)) => err.program_error_code(),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct DerivedAddresses {
    program_id: Pubkey,
    authority: Pubkey,
    campaign: Pubkey,
    campaign_bump: u8,
    vault: Pubkey,
    vault_bump: u8,
}

#[derive(Serialize)]
struct SimulationOutput {
    host: HostConfig,
    scenario: ScenarioReport,
    ledger: LedgerSnapshot,
}

#[derive(Serialize)]
#[serde(tag = "instruction", rename_all = "snake_case")]
enum DecodedInstruction {
    Initialize { target: u64, description: String },
    Donate { amount: u64 },
    Withdraw,
}

fn derive_cmd(authority: Pubkey, program_id: Option<Pubkey>) -> Result<(), CliError> {
    let program_id = program_id.unwrap_or_else(config::default_program_id);
    let addrs = CampaignAddresses::derive(&Sha256Deriver, &program_id, &authority)?;
    print_json(&DerivedAddresses {
        program_id,
        authority,
        campaign: addrs.campaign,
        campaign_bump: addrs.campaign_bump,
        vault: addrs.vault,
        vault_bump: addrs.vault_bump,
    })
}

fn encode_ix_cmd(ix: EncodeIx) -> Result<(), CliError> {
    let ix = match ix {
        EncodeIx::Initialize {
            target,
            description,
        } => CampaignInstruction::initialize(target, &description)?,
        EncodeIx::Donate { amount } => CampaignInstruction::Donate { amount },
        EncodeIx::Withdraw => CampaignInstruction::Withdraw,
    };
    println!("{}", hex::encode(ix.pack()));
    Ok(())
}

fn decode_ix_cmd(payload: &str) -> Result<(), CliError> {
    let bytes = decode_hex_arg("hex", payload)?;
    let ix = CampaignInstruction::unpack(&bytes)?;
    let description = ix.description_text().transpose()?.unwrap_or_default();
    let decoded = match ix {
        CampaignInstruction::Initialize { target, .. } => {
            DecodedInstruction::Initialize {
                target,
                description,
            }
        }
        CampaignInstruction::Donate { amount } => DecodedInstruction::Donate { amount },
        CampaignInstruction::Withdraw => DecodedInstruction::Withdraw,
    };
    print_json(&decoded)
}

fn decode_record_cmd(args: DecodeRecordArgs) -> Result<(), CliError> {
    let bytes = match (args.hex, args.base64) {
        (Some(h), _) => decode_hex_arg("hex", &h)?,
        (None, Some(b)) => general_purpose::STANDARD
            .decode(b.trim())
            .map_err(|e| CliError::Input {
                flag: "base64",
                reason: e.to_string(),
            })?,
        (None, None) => {
            return Err(CliError::Input {
                flag: "hex",
                reason: "one of --hex or --base64 is required".to_string(),
            })
        }
    };
    let mode = if args.strict {
        TagMode::Strict
    } else {
        TagMode::Lenient
    };
    let record = CampaignRecord::unpack_with(&bytes, mode)?;
    print_json(&record)
}

fn simulate_cmd(args: SimulateArgs) -> Result<(), CliError> {
    let output = simulate(args)?;
    for line in &output.scenario.logs {
        eprintln!("{line}");
    }
    eprintln!("state root {}", hex::encode(output.ledger.state_root));
    print_json(&output)
}

fn simulate(args: SimulateArgs) -> Result<SimulationOutput, CliError> {
    let host_config = HostConfig::load_or_default(args.config.as_deref())?;
    let defaults = ScenarioConfig::default();
    let scenario = ScenarioConfig {
        target: args.target.unwrap_or(defaults.target),
        description: args.description.unwrap_or(defaults.description),
        donations: vec![args.donation; args.donations],
        ..defaults
    };
    eprintln!(
        "simulating {} donation(s) of {} lamports against program {}",
        scenario.donations.len(),
        args.donation,
        host_config.program_id
    );
    let mut runtime = Runtime::new(host_config);
    let report = run_scenario(&mut runtime, &scenario)?;
    Ok(SimulationOutput {
        host: runtime.config().clone(),
        scenario: report,
        ledger: runtime.ledger().snapshot(),
    })
}

fn decode_hex_arg(flag: &'static str, value: &str) -> Result<Vec<u8>, CliError> {
    hex::decode(value.trim()).map_err(|e| CliError::Input {
        flag,
        reason: e.to_string(),
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Derive {
            authority,
            program_id,
        } => derive_cmd(authority, program_id),
        Command::EncodeIx { instruction } => encode_ix_cmd(instruction),
        Command::DecodeIx { hex } => decode_ix_cmd(&hex),
        Command::DecodeRecord(args) => decode_record_cmd(args),
        Command::Simulate(args) => simulate_cmd(args),
    };
    if let Err(err) = result {
        eprintln!("error: {err}");
        if let Some(code) = err.program_error_code() {
            eprintln!("program error code: {code}");
        }
        std::process::exit(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use crate::ledger::LedgerEvent;

    fn simulate_args(extra: &[&str]) -> SimulateArgs {
        let argv = ["crowdfund", "simulate"].into_iter().chain(extra.iter().copied());
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Simulate(args) => args,
            _ => panic!("expected simulate"),
        }
    }

    #[test]
    fn simulate_reports_ledger_state() {
        let output = simulate(simulate_args(&["--donations=2"])).unwrap();
        assert_eq!(output.host, HostConfig::default());
        assert_eq!(output.scenario.donations.len(), 2);
        assert_eq!(output.ledger.meta.height, 4);
        assert_ne!(output.ledger.state_root, [0u8; 32]);
        assert!(output
            .ledger
            .events
            .iter()
            .any(|e| matches!(e, LedgerEvent::ProgramLog { .. })));
        assert!(output
            .ledger
            .accounts
            .get(&output.scenario.campaign)
            .is_none());
    }

    #[test]
    fn rejected_simulation_carries_program_code() {
        let err = simulate(simulate_args(&["--target=0"])).err().unwrap();
        assert_eq!(err.program_error_code(), Some(104));
        assert!(decode_ix_cmd("0100").unwrap_err().program_error_code().is_none());
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn decode_record_takes_exactly_one_input() {
        assert!(Cli::try_parse_from(["crowdfund", "decode-record", "--strict"]).is_err());
        assert!(
            Cli::try_parse_from(["crowdfund", "decode-record", "--hex=00", "--base64=AA=="]).is_err()
        );
        assert!(Cli::try_parse_from(["crowdfund", "decode-record", "--base64=AA==", "--strict"]).is_ok());
    }

    #[test]
    fn derive_parses_base58_keys() {
        let cli = Cli::try_parse_from([
            "crowdfund",
            "derive",
            "--authority=SeedPubey1111111111111111111111111111111111",
        ])
        .unwrap();
        match cli.command {
            Command::Derive {
                authority,
                program_id: None,
            } => assert_eq!(
                authority.to_string(),
                "SeedPubey1111111111111111111111111111111111"
            ),
            _ => panic!("expected derive"),
        }
        assert!(Cli::try_parse_from(["crowdfund", "derive", "--authority=0OIl"]).is_err());
    }

    #[test]
    fn decode_errors_name_the_flag() {
        let err = decode_hex_arg("hex", "zz").unwrap_err();
        assert!(err.to_string().starts_with("invalid --hex:"));
        assert!(matches!(
            decode_ix_cmd("0100"),
            Err(CliError::Protocol(CrowdfundError::InvalidInstruction))
        ));
    }
}
