//! KUSD Keeper
//!
//! Autonomous keeper for a KUSD collateralized-debt stablecoin deployment:
//! - Watches the vault population via `Frob` logs and liquidates unsafe
//!   vaults (`dog.bark`)
//! - Tracks Dutch collateral auctions and takes profitably priced lots
//! - Bids on surplus/debt English auctions when configured to
//! - Arbitrages the DEX/PSM peg inside capital and slippage limits
//!
//! Configuration is environment-variable driven (see `KeeperConfig`);
//! a `.env` file is honored. Exit codes: 0 graceful shutdown, 1 fatal
//! startup error, 2 unrecoverable runtime fault.

use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use keeper_chain::{ChainClient, EventListener, TxSender};
use keeper_core::{
    AuctionMonitor, DebtExecutor, DebtMonitor, KeeperConfig, KeeperHealth, LiquidationExecutor,
    Orchestrator, PegArbService, PriceService, SurplusExecutor, SurplusMonitor, TakeExecutor,
    VatBalanceManager, VaultMonitor,
};

#[tokio::main]
async fn main() -> ExitCode {
    print_banner();
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,keeper_core=debug,keeper_chain=debug")),
        )
        .init();

    info!("Starting KUSD keeper");

    let config = match KeeperConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return ExitCode::from(1);
        }
    };
    config.log_config();

    let orchestrator = match initialize(config).await {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            error!(error = %e, "Startup failed");
            return ExitCode::from(1);
        }
    };

    match orchestrator.run().await {
        Ok(()) => {
            info!("Keeper exited gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Unrecoverable runtime fault");
            ExitCode::from(2)
        }
    }
}

/// Wire every component from the validated configuration. Any failure
/// here is a startup error (exit code 1): a dead RPC, a rejected key, an
/// unreadable PSM.
async fn initialize(config: KeeperConfig) -> anyhow::Result<Orchestrator> {
    info!("Initializing components");

    let client = Arc::new(
        ChainClient::connect(&config.rpc_url, &config.ws_url, config.addresses.clone()).await?,
    );

    let observed_chain_id = client.chain_id().await?;
    if observed_chain_id != config.chain_id {
        anyhow::bail!(
            "CHAIN_ID mismatch: configured {} but node reports {}",
            config.chain_id,
            observed_chain_id
        );
    }

    let sender = Arc::new(
        TxSender::new(
            &config.private_key,
            &config.rpc_url,
            config.chain_id,
            config.gas_limit,
            config.gas_price,
            config.max_gas_price,
        )
        .await?,
    );
    info!(keeper = %sender.address, "Signer ready");

    let listener = Arc::new(EventListener::new(
        &config.ws_url,
        config.addresses.vat,
        config.addresses.dog,
        config.addresses.flapper,
        config.addresses.flopper,
    ));

    let health = Arc::new(KeeperHealth::new(config.mode));

    let prices = Arc::new(PriceService::new(client.clone()));
    for collateral in &config.collaterals {
        prices.register_oracle(collateral.ilk, collateral.oracle);
    }
    info!(oracles = config.collaterals.len(), "Price service ready");

    let vaults = Arc::new(VaultMonitor::new(client.clone()));
    let auctions = Arc::new(AuctionMonitor::new(client.clone()));
    let surplus = Arc::new(SurplusMonitor::init(client.clone()).await);
    let debt = Arc::new(DebtMonitor::init(client.clone()).await);

    let balances = Arc::new(VatBalanceManager::new(client.clone(), sender.clone()));

    let liquidation_executor = LiquidationExecutor::new(
        client.clone(),
        sender.clone(),
        health.clone(),
        config.emergency_stop,
    );
    let take_executor = TakeExecutor::new(
        client.clone(),
        sender.clone(),
        health.clone(),
        config.emergency_stop,
        config.max_collateral_per_auction,
    );
    let surplus_executor = SurplusExecutor::new(
        client.clone(),
        sender.clone(),
        health.clone(),
        config.emergency_stop,
    );
    let debt_executor = DebtExecutor::new(
        client.clone(),
        sender.clone(),
        health.clone(),
        config.emergency_stop,
    );

    let peg = if config.mode.runs_peg() {
        Some(Arc::new(
            PegArbService::init(
                client.clone(),
                sender.clone(),
                health.clone(),
                config.peg.clone(),
            )
            .await?,
        ))
    } else {
        None
    };

    let orchestrator = Orchestrator::new(
        config,
        listener,
        vaults,
        auctions,
        surplus,
        debt,
        prices,
        balances,
        liquidation_executor,
        take_executor,
        surplus_executor,
        debt_executor,
        health,
        peg,
    );

    orchestrator.bootstrap().await?;
    info!("All components initialized");
    Ok(orchestrator)
}

fn print_banner() {
    println!(
        r#"
  ██╗  ██╗██╗   ██╗███████╗██████╗     ██╗  ██╗███████╗███████╗██████╗ ███████╗██████╗
  ██║ ██╔╝██║   ██║██╔════╝██╔══██╗    ██║ ██╔╝██╔════╝██╔════╝██╔══██╗██╔════╝██╔══██╗
  █████╔╝ ██║   ██║███████╗██║  ██║    █████╔╝ █████╗  █████╗  ██████╔╝█████╗  ██████╔╝
  ██╔═██╗ ██║   ██║╚════██║██║  ██║    ██╔═██╗ ██╔══╝  ██╔══╝  ██╔═══╝ ██╔══╝  ██╔══██╗
  ██║  ██╗╚██████╔╝███████║██████╔╝    ██║  ██╗███████╗███████╗██║     ███████╗██║  ██║
  ╚═╝  ╚═╝ ╚═════╝ ╚══════╝╚═════╝     ╚═╝  ╚═╝╚══════╝╚══════╝╚═╝     ╚══════╝╚═╝  ╚═╝

                       vault . auction . peg  —  v0.1.0
"#
    );
}
