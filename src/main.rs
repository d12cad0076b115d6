use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use log::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use ledger_node::api::{self, AppState};
use ledger_node::blockchain::{self, Ed25519Signer, Ledger, Signer};
use ledger_node::config::{AppConfig, LedgerConfig, NodeConfig};
use ledger_node::miner::Miner;
use ledger_node::network::{LocalTransport, Node, Transport};

// Open the persistent ledger when a data directory is configured
fn initialize_ledger(config: &AppConfig) -> Ledger {
    let Some(data_dir) = &config.data_dir else {
        info!("No data directory configured, using an in-memory ledger");
        return Ledger::new(config.ledger);
    };

    std::fs::create_dir_all(data_dir).unwrap_or_else(|e| {
        warn!("Failed to create data directory: {}", e);
    });

    match Ledger::with_storage(data_dir, config.ledger) {
        Ok(ledger) => {
            info!(
                "Loaded ledger from {} at height {}",
                data_dir.display(),
                ledger.len()
            );
            ledger
        }
        Err(err) => {
            warn!("Failed to load ledger from storage: {}", err);
            warn!("Creating in-memory ledger instead");
            Ledger::new(config.ledger)
        }
    }
}

// Replica nodes sharing the in-process transport with the primary node
async fn spawn_replicas(
    count: usize,
    primary: &str,
    ledger_config: LedgerConfig,
    transport: Arc<dyn Transport>,
) -> anyhow::Result<Vec<Arc<Node>>> {
    let mut replicas = Vec::with_capacity(count);

    for i in 1..=count {
        let address = format!("replica-{}", i);
        let config = NodeConfig {
            listen_address: address.clone(),
            bootstrap_peers: vec![primary.to_string()],
            simulated_peers: 0,
        };

        let node = Arc::new(Node::new(Ledger::new(ledger_config), transport.clone(), config));
        node.start(&address)
            .await
            .with_context(|| format!("failed to start replica {}", address))?;

        replicas.push(node);
    }

    Ok(replicas)
}

// Log a throwaway key so signed transactions can be tried from the Swagger UI
fn log_demo_signer() {
    let signer = Ed25519Signer::generate();
    info!("Demo signer address: {}", signer.address());
    info!("Demo signer private key: {}", signer.secret_key_hex());
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::get_chain,
        api::handlers::get_pending_transactions,
        api::handlers::new_transaction,
        api::handlers::mine_block,
        api::handlers::validate_chain,
        api::handlers::get_balance,
        api::handlers::get_peers,
        api::handlers::get_miner,
        api::handlers::start_miner,
        api::handlers::stop_miner
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::Transaction,
            blockchain::Address,
            blockchain::DigitalSignature,
            api::handlers::ChainResponse,
            api::handlers::TransactionRequest,
            api::handlers::TransactionResponse,
            api::handlers::MineRequest,
            api::handlers::MineResponse,
            api::handlers::BalanceResponse,
            api::handlers::PeersResponse,
            api::handlers::MinerStatusResponse
        )
    ),
    tags(
        (name = "ledger", description = "Ledger node API endpoints")
    ),
    info(
        title = "Ledger Node API",
        version = "1.0.0",
        description = "A minimal proof-of-work ledger node",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = AppConfig::from_env().context("invalid configuration")?;
    info!(
        "Starting with difficulty {} and block reward {}",
        config.ledger.difficulty, config.ledger.block_reward
    );

    let ledger = initialize_ledger(&config);
    let transport: Arc<dyn Transport> = LocalTransport::new();

    let listen_address = config.node.listen_address.clone();
    let node = Arc::new(Node::new(ledger.clone(), transport.clone(), config.node.clone()));
    node.start(&listen_address)
        .await
        .context("failed to start node")?;
    info!("Node {} started on {}", node.node_id(), listen_address);

    let replicas = spawn_replicas(
        config.node.simulated_peers,
        &listen_address,
        config.ledger,
        transport.clone(),
    )
    .await?;
    if !replicas.is_empty() {
        info!("Started {} replica nodes", replicas.len());
    }

    let miner = Arc::new(Miner::new(ledger.clone(), node.clone(), config.miner.clone()));
    miner.start();

    log_demo_signer();

    let state = web::Data::new(AppState {
        ledger,
        node: node.clone(),
        miner: miner.clone(),
    });

    let (host, port) = (config.api.host.clone(), config.api.port);
    info!("Starting HTTP server at http://{}:{}", host, port);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        let openapi = ApiDoc::openapi();

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(state.clone())
            .configure(api::configure_routes)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", openapi.clone())
            )
    })
    .bind((host.as_str(), port))
    .with_context(|| format!("failed to bind {}:{}", host, port))?
    .run()
    .await?;

    info!("HTTP server stopped, shutting down");
    miner.shutdown().await;
    node.stop();
    for replica in &replicas {
        replica.stop();
    }

    Ok(())
}
