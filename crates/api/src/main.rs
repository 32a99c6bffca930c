use anyhow::Context;

use rxledger_infra::LedgerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rxledger_observability::init();

    let config = LedgerConfig::load().context("failed to load configuration")?;
    let address = config.bind_address();

    let ledger = rxledger_api::app::services::build_services(config)
        .await
        .context("failed to build ledger services")?;
    let sweeper = ledger.spawn_sweeper();

    let app = rxledger_api::app::build_app(ledger);

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("server error")?;

    sweeper.shutdown().await;
    Ok(())
}
