//! Devote node CLI
//!
//! Command-line interface for maintaining a local devote consensus state:
//! masternode registration, delegation, witness scheduling and mint
//! accounting, one committed block per command.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use devote_consensus::{cycle_of, Address, DevoteOp, Hash, MasternodeId};
use devote_node::{NodeConfig, NodeStore};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Devote node CLI
#[derive(Parser)]
#[command(name = "devote")]
#[command(about = "Devote consensus state tool")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory, overrides the configuration
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a node at genesis
    Init {
        /// Overwrite an existing node
        #[arg(short, long)]
        force: bool,
    },

    /// Register a masternode
    Register {
        /// Masternode identifier (hex)
        id: MasternodeId,
        /// Bonding account (hex)
        account: Address,
    },

    /// Unregister a masternode and drop its votes
    Unregister {
        /// Masternode identifier (hex)
        id: MasternodeId,
    },

    /// Unregister every masternode bonded by an account
    UnregisterAccount {
        /// Bonding account (hex)
        account: Address,
    },

    /// Delegate a vote to a masternode
    Delegate {
        /// Delegator account (hex)
        delegator: Address,
        /// Masternode identifier (hex)
        masternode: MasternodeId,
    },

    /// Withdraw a vote from a masternode
    Undelegate {
        /// Delegator account (hex)
        delegator: Address,
        /// Masternode identifier (hex)
        masternode: MasternodeId,
    },

    /// Witness schedule
    Witnesses {
        #[command(subcommand)]
        action: WitnessCommands,
    },

    /// Record a minted block for a witness
    Roll {
        /// Parent block timestamp
        parent_timestamp: u64,
        /// Block timestamp
        timestamp: u64,
        /// Witness account (hex)
        witness: Address,
    },

    /// Apply a block of operations from a JSON file
    Apply {
        /// File holding a JSON array of operations
        file: PathBuf,
        /// Combined root the block declares
        #[arg(short, long)]
        root: Option<Hash>,
    },

    /// Show the head and the state summary
    Status,

    /// Show one masternode
    Masternode {
        /// Masternode identifier (hex)
        id: MasternodeId,
    },

    /// Show mint counts of a cycle
    Mints {
        /// Cycle number, defaults to the cycle of the given timestamp
        #[arg(long, conflicts_with = "timestamp")]
        cycle: Option<u64>,
        /// Block timestamp
        #[arg(long)]
        timestamp: Option<u64>,
    },
}

#[derive(Subcommand)]
enum WitnessCommands {
    /// Replace the witness schedule
    Set {
        /// Witness accounts in schedule order (hex)
        witnesses: Vec<Address>,
    },
    /// Show the witness schedule
    Show,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .unwrap_or_else(NodeConfig::get_default_config_file);
    let mut config = if config_path.exists() {
        NodeConfig::from_file(&config_path)?
    } else {
        NodeConfig::default()
    };
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    config.validate()?;

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        config.level()?
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    match cli.command {
        Commands::Init { force } => handle_init(config, &config_path, force),
        Commands::Register { id, account } => {
            handle_op(config, DevoteOp::Register { id, account })
        }
        Commands::Unregister { id } => handle_op(config, DevoteOp::Unregister { id }),
        Commands::UnregisterAccount { account } => {
            handle_op(config, DevoteOp::UnregisterAccount { account })
        }
        Commands::Delegate {
            delegator,
            masternode,
        } => handle_op(
            config,
            DevoteOp::Delegate {
                delegator,
                masternode,
            },
        ),
        Commands::Undelegate {
            delegator,
            masternode,
        } => handle_op(
            config,
            DevoteOp::UnDelegate {
                delegator,
                masternode,
            },
        ),
        Commands::Witnesses { action } => handle_witnesses(config, action),
        Commands::Roll {
            parent_timestamp,
            timestamp,
            witness,
        } => handle_op(
            config,
            DevoteOp::Rolling {
                parent_timestamp,
                timestamp,
                witness,
            },
        ),
        Commands::Apply { file, root } => handle_apply(config, &file, root),
        Commands::Status => handle_status(config),
        Commands::Masternode { id } => handle_masternode(config, &id),
        Commands::Mints { cycle, timestamp } => handle_mints(config, cycle, timestamp),
    }
}

fn handle_init(config: NodeConfig, config_path: &Path, force: bool) -> Result<()> {
    if !config_path.exists() {
        config.save_to_file(config_path)?;
        info!("Wrote default configuration to {}", config_path.display());
    }

    let store = NodeStore::init(config, force)?;
    println!("Initialized node at {}", store.config().data_dir.display());
    println!("Root: {}", store.head().root);
    Ok(())
}

fn handle_op(config: NodeConfig, op: DevoteOp) -> Result<()> {
    let mut store = NodeStore::open(config)?;
    let head = store.apply_block(std::slice::from_ref(&op), None)?;
    println!("Height {} root {}", head.height, head.root);
    Ok(())
}

fn handle_witnesses(config: NodeConfig, action: WitnessCommands) -> Result<()> {
    match action {
        WitnessCommands::Set { witnesses } => {
            if witnesses.is_empty() {
                warn!("Setting an empty witness schedule");
            }
            handle_op(config, DevoteOp::SetWitnesses { witnesses })
        }
        WitnessCommands::Show => {
            let store = NodeStore::open(config)?;
            let witnesses = store.state()?.witnesses()?;
            if witnesses.is_empty() {
                println!("No witnesses scheduled");
            }
            for (slot, witness) in witnesses.iter().enumerate() {
                println!("{:>4}  {}", slot, witness);
            }
            Ok(())
        }
    }
}

fn handle_apply(config: NodeConfig, file: &Path, root: Option<Hash>) -> Result<()> {
    let contents = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let ops: Vec<DevoteOp> = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse operations in {}", file.display()))?;

    let mut store = NodeStore::open(config)?;
    let head = store.apply_block(&ops, root.as_ref())?;
    println!(
        "Applied {} operations, height {} root {}",
        ops.len(),
        head.height,
        head.root
    );
    Ok(())
}

fn handle_status(config: NodeConfig) -> Result<()> {
    let store = NodeStore::open(config)?;
    let head = store.head();
    let state = store.state()?;

    println!("Height: {}", head.height);
    println!("Root:   {}", head.root);
    println!("{}", serde_json::to_string_pretty(&head.checkpoint)?);

    let masternodes = state.masternodes()?;
    println!("Masternodes: {}", masternodes.len());
    for masternode in masternodes {
        println!(
            "  {}  account {}  votes {}",
            masternode.id,
            masternode.account,
            state.vote_tally(&masternode.id)?
        );
    }
    println!("Witnesses: {}", state.witnesses()?.len());
    Ok(())
}

fn handle_masternode(config: NodeConfig, id: &MasternodeId) -> Result<()> {
    let store = NodeStore::open(config)?;
    let state = store.state()?;

    let Some(account) = state.masternode_account(id)? else {
        println!("Masternode {} is not registered", id);
        return Ok(());
    };
    println!("Masternode: {}", id);
    println!("Account:    {}", account);
    println!("Votes:      {}", state.vote_tally(id)?);
    for delegator in state.delegators(id)? {
        println!("  {}", delegator);
    }
    Ok(())
}

fn handle_mints(config: NodeConfig, cycle: Option<u64>, timestamp: Option<u64>) -> Result<()> {
    let cycle = match (cycle, timestamp) {
        (Some(cycle), _) => cycle,
        (None, Some(timestamp)) => cycle_of(timestamp),
        (None, None) => anyhow::bail!("Give either --cycle or --timestamp"),
    };

    let store = NodeStore::open(config)?;
    let counts = store.state()?.cycle_mint_counts(cycle)?;
    println!("Cycle {}: {} witnesses minted", cycle, counts.len());
    for (witness, count) in counts {
        println!("  {}  {}", witness, count);
    }
    Ok(())
}
