//! meta-relay: grant or revoke a flow operator permission, directly or through
//! a meta-transaction relay.

use alloy::primitives::{aliases::I96, Address, U256};
use alloy::signers::local::PrivateKeySigner;
use clap::{Parser, Subcommand, ValueEnum};
use eyre::{bail, eyre, Result, WrapErr};
use tracing::{debug, info};

use meta_relay_adapters::{
    encode_call, JsonRpcClient, LocalDigestAdapter, LocalSignerAdapter, PreflightAdapter,
    RelayConfig, RelayServiceAdapter, RpcChainAdapter, SimulatedChain, SystemClockAdapter,
    WalletRpcSigner,
};
use meta_relay_core::{
    GasPolicy, PermissionOperation, Pipeline, SessionContext, SignerPort, SigningScheme,
    SubmissionOutcome, SubmissionPath,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// JSON-RPC endpoint of the chain (and of the wallet when no key is given).
    #[arg(long, global = true, env = "META_RELAY_RPC_URL")]
    rpc_url: Option<String>,

    /// Base URL of the relay service.
    #[arg(long, global = true, env = "META_RELAY_RELAY_URL")]
    relay_url: Option<String>,

    #[arg(long, global = true)]
    chain_id: Option<u64>,

    /// Sign locally with this key instead of asking the wallet.
    #[arg(long, global = true, env = "META_RELAY_PRIVATE_KEY", hide_env_values = true)]
    private_key: Option<String>,

    /// Wallet account to sign with when no private key is given.
    #[arg(long, global = true, env = "META_RELAY_ACCOUNT")]
    account: Option<Address>,

    /// Skip the trusted-forwarder check before relaying.
    #[arg(long, global = true)]
    no_preflight: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the signer, the current permission and relay readiness.
    Status,
    /// Grant the configured operator permission over the configured token.
    Grant {
        /// Permission bits: 1 create, 2 update, 4 delete.
        #[arg(long)]
        level: Option<u8>,
        /// Flow rate allowance in wei per second.
        #[arg(long)]
        allowance: Option<I96>,
        #[arg(long, value_enum, default_value_t = PathArg::Personal)]
        path: PathArg,
    },
    /// Revoke every permission of the configured operator.
    Revoke {
        #[arg(long, value_enum, default_value_t = PathArg::Personal)]
        path: PathArg,
    },
    /// Ask a target whether it trusts the configured forwarder.
    Trust {
        /// Defaults to the host.
        #[arg(long)]
        target: Option<Address>,
    },
    /// Encode a call from its signature and send it through the pipeline.
    Call {
        /// e.g. `callAgreement(address,bytes,bytes)`
        signature: String,
        args: Vec<String>,
        /// Defaults to the host.
        #[arg(long)]
        target: Option<Address>,
        #[arg(long, value_enum, default_value_t = PathArg::Personal)]
        path: PathArg,
    },
    /// Grant then revoke against an in-process chain.
    Simulate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum PathArg {
    /// Send the transaction from the signer's own account.
    Direct,
    /// Relay with an EIP-191 personal signature.
    Personal,
    /// Relay with an EIP-712 typed-data signature.
    Typed,
}

impl From<PathArg> for SubmissionPath {
    fn from(arg: PathArg) -> Self {
        match arg {
            PathArg::Direct => SubmissionPath::Direct,
            PathArg::Personal => SubmissionPath::Relay(SigningScheme::PersonalSign),
            PathArg::Typed => SubmissionPath::Relay(SigningScheme::TypedData),
        }
    }
}

type LivePipeline<G> = Pipeline<
    RpcChainAdapter,
    SystemClockAdapter,
    LocalDigestAdapter,
    G,
    RpcChainAdapter,
    RelayServiceAdapter,
    RpcChainAdapter,
    RpcChainAdapter,
    RpcChainAdapter,
>;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    match dotenvy::dotenv() {
        Ok(path) => debug!(?path, "loaded environment file"),
        Err(e) if e.not_found() => debug!("no .env file found"),
        Err(e) => bail!("failed to load .env file: {e}"),
    }

    let cli = Cli::parse();
    let cfg = load_config(&cli)?;
    debug!(config = ?cfg, "configuration loaded");

    if matches!(cli.command, Command::Simulate) {
        return simulate(&cfg).await;
    }

    let ctx = cfg.session_context()?;
    let rpc = JsonRpcClient::new(cfg.rpc_url.clone(), cfg.http_timeout())?;

    if let Command::Trust { target } = &cli.command {
        let report = PreflightAdapter::new(rpc)
            .report(target.unwrap_or(ctx.host), ctx.forwarder)
            .await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    match (&cli.private_key, cli.account) {
        (Some(key), _) => {
            let signer = LocalSignerAdapter::from_hex(key)?;
            run(&cli.command, &cfg, ctx, rpc, signer).await
        }
        (None, Some(account)) => {
            let signer = WalletRpcSigner::new(rpc.clone(), account);
            run(&cli.command, &cfg, ctx, rpc, signer).await
        }
        (None, None) => Err(eyre!(
            "no signer: pass --private-key or --account (or set META_RELAY_PRIVATE_KEY)"
        )),
    }
}

fn load_config(cli: &Cli) -> Result<RelayConfig> {
    let mut cfg = RelayConfig::from_env()?;
    if let Some(url) = &cli.rpc_url {
        cfg.rpc_url = url.clone();
    }
    if let Some(url) = &cli.relay_url {
        cfg.relay_url = url.trim_end_matches('/').to_owned();
    }
    if let Some(chain_id) = cli.chain_id {
        cfg.chain_id = chain_id;
    }
    if cli.no_preflight {
        cfg.preflight_trusted_forwarder = false;
    }
    Ok(cfg)
}

async fn run<G: SignerPort>(
    command: &Command,
    cfg: &RelayConfig,
    ctx: SessionContext,
    rpc: JsonRpcClient,
    signer: G,
) -> Result<()> {
    let chain = RpcChainAdapter::new(rpc.clone(), ctx.forwarder, cfg.receipt_poll_interval());
    let relay = RelayServiceAdapter::new(
        cfg.relay_url.clone(),
        cfg.relay_api_key.clone(),
        rpc,
        cfg.http_timeout(),
    )?;
    let pipeline: LivePipeline<G> = Pipeline::new(
        ctx,
        chain.clone(),
        SystemClockAdapter,
        LocalDigestAdapter,
        signer,
        chain.clone(),
        relay,
        chain.clone(),
        chain.clone(),
        chain,
    );

    let permission = pipeline.mount().await?;
    info!(owner = %pipeline.owner(), permission = permission.level(), "session mounted");

    let (operation, path) = match command {
        Command::Status => {
            println!("owner:      {}", pipeline.owner());
            println!("operator:   {}", pipeline.context().operator);
            println!("permission: {:#05b}", permission.level());
            match pipeline.relay().check_ready().await {
                Ok(()) => println!("relay:      ready"),
                Err(e) => println!("relay:      {e}"),
            }
            return Ok(());
        }
        Command::Grant {
            level,
            allowance,
            path,
        } => (
            PermissionOperation::Grant {
                level: level.unwrap_or(cfg.grant_level),
                allowance: allowance.unwrap_or(cfg.flow_rate_allowance),
            },
            *path,
        ),
        Command::Revoke { path } => (PermissionOperation::Revoke, *path),
        Command::Call {
            signature,
            args,
            target,
            path,
        } => {
            let payload = encode_call(signature, args)
                .wrap_err_with(|| format!("failed to encode {signature}"))?;
            (
                PermissionOperation::Call {
                    target: target.unwrap_or(pipeline.context().host),
                    payload,
                },
                *path,
            )
        }
        Command::Trust { .. } | Command::Simulate => bail!("command does not submit"),
    };

    if path != PathArg::Direct {
        pipeline.relay().check_ready().await?;
    }
    let outcome = pipeline.execute(operation, path.into()).await?;
    report(&outcome);
    Ok(())
}

async fn simulate(cfg: &RelayConfig) -> Result<()> {
    let chain = SimulatedChain::default();
    let d = chain.deployment();
    let or_fallback = |addr: Address, byte: u8| {
        if addr.is_zero() {
            Address::with_last_byte(byte)
        } else {
            addr
        }
    };
    let ctx = SessionContext {
        chain_id: d.chain_id,
        host: d.host,
        agreement: d.agreement,
        forwarder: d.forwarder,
        token: or_fallback(cfg.token, 0xa1),
        operator: or_fallback(cfg.operator, 0xb2),
        fee_token: Address::ZERO,
        gas: GasPolicy {
            tx_gas: cfg.tx_gas,
            token_gas_price: U256::ZERO,
            batch_id: U256::ZERO,
            deadline_offset_secs: cfg.deadline_offset_secs,
        },
        domain_name: d.domain_name.clone(),
        domain_version: d.domain_version.clone(),
        user_data: cfg.user_data.clone(),
        preflight_trusted_forwarder: cfg.preflight_trusted_forwarder,
    };

    let signer = LocalSignerAdapter::new(PrivateKeySigner::random());
    let pipeline = Pipeline::new(
        ctx,
        chain.clone(),
        chain.clone(),
        LocalDigestAdapter,
        signer,
        chain.clone(),
        chain.clone(),
        chain.clone(),
        chain.clone(),
        chain.clone(),
    );
    pipeline.mount().await?;

    let grant = PermissionOperation::Grant {
        level: cfg.grant_level,
        allowance: I96::ZERO,
    };
    for (operation, path) in [
        (grant, SubmissionPath::Relay(SigningScheme::PersonalSign)),
        (
            PermissionOperation::Revoke,
            SubmissionPath::Relay(SigningScheme::TypedData),
        ),
    ] {
        let outcome = pipeline.execute(operation, path).await?;
        report(&outcome);
        for t in pipeline.history() {
            println!("  {:?} -> {:?} ({})", t.from, t.to, t.reason);
        }
    }
    Ok(())
}

fn report(outcome: &SubmissionOutcome) {
    println!(
        "tx {} confirmed in block {} via {:?}",
        outcome.confirmation.tx_hash, outcome.confirmation.block_number, outcome.path
    );
    if let Some(nonce) = outcome.batch_nonce {
        println!("batch nonce: {nonce}");
    }
    println!("permission:  {:#05b}", outcome.permission.level());
}
