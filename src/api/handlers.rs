use std::sync::Arc;

use actix_web::{web, HttpResponse, Responder};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::blockchain::{Block, Ed25519Signer, Ledger, Signer, Transaction};
use crate::miner::Miner;
use crate::network::Node;

/// Everything the handlers need, shared across actix workers
pub struct AppState {
    pub ledger: Ledger,
    pub node: Arc<Node>,
    pub miner: Arc<Miner>,
}

pub type AppData = web::Data<AppState>;

/// Response for the chain endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The length of the chain
    pub length: usize,

    /// The blocks in the chain
    pub chain: Vec<Block>,

    /// Whether the chain is valid
    pub is_valid: bool,
}

/// Request for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionRequest {
    /// The sender's address
    pub sender: String,

    /// The recipient's address
    pub recipient: String,

    /// The amount to transfer
    pub amount: i64,

    /// The transaction fee
    #[serde(default)]
    pub fee: i64,

    /// Hex encoded ed25519 secret key; when present the transaction is signed
    /// and the key must belong to `sender`
    #[serde(default)]
    pub private_key: Option<String>,
}

/// Response for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    pub message: String,

    /// Id of the admitted transaction
    pub transaction_id: String,

    /// The index of the block that will include this transaction
    pub block_index: u64,
}

/// Request for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema, Default)]
pub struct MineRequest {
    /// The miner's address; the configured miner address when omitted
    #[serde(default)]
    pub miner_address: Option<String>,
}

/// Response for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineResponse {
    pub message: String,

    /// The newly mined block
    pub block: Block,
}

/// Response for the balance endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    pub address: String,
    pub balance: i64,
}

/// Response for the peers endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct PeersResponse {
    pub node_id: String,
    pub listen_address: Option<String>,
    pub peers: Vec<String>,
}

/// Response for the miner endpoints
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MinerStatusResponse {
    pub address: String,
    pub active: bool,
    pub blocks_mined: u64,
}

fn miner_status(miner: &Miner) -> MinerStatusResponse {
    MinerStatusResponse {
        address: miner.miner_address().to_string(),
        active: miner.is_mining_active(),
        blocks_mined: miner.blocks_mined(),
    }
}

/// Get the full blockchain
///
/// Returns the entire blockchain and its validity status
#[utoipa::path(
    get,
    path = "/api/v1/chain",
    responses(
        (status = 200, description = "Blockchain retrieved successfully", body = ChainResponse)
    )
)]
pub async fn get_chain(state: AppData) -> impl Responder {
    let chain = state.ledger.chain_snapshot();
    let is_valid = state.ledger.validate_chain();

    HttpResponse::Ok().json(ChainResponse {
        length: chain.len(),
        chain,
        is_valid,
    })
}

/// Get all pending transactions
#[utoipa::path(
    get,
    path = "/api/v1/transactions/pending",
    responses(
        (status = 200, description = "Pending transactions retrieved successfully", body = Vec<Transaction>)
    )
)]
pub async fn get_pending_transactions(state: AppData) -> impl Responder {
    HttpResponse::Ok().json(state.ledger.pending_snapshot())
}

/// Submit a new transaction
///
/// Admits the transaction into the pending pool and announces it to peers
#[utoipa::path(
    post,
    path = "/api/v1/transactions/new",
    request_body = TransactionRequest,
    responses(
        (status = 201, description = "Transaction admitted", body = TransactionResponse),
        (status = 400, description = "Invalid transaction data")
    )
)]
pub async fn new_transaction(
    state: AppData,
    transaction_req: web::Json<TransactionRequest>,
) -> impl Responder {
    let request = transaction_req.into_inner();
    let mut transaction = Transaction::new(
        request.sender.as_str(),
        request.recipient.as_str(),
        request.amount,
        request.fee,
    );

    if let Some(private_key) = &request.private_key {
        let signer = match Ed25519Signer::from_hex(private_key) {
            Ok(signer) => signer,
            Err(err) => {
                return HttpResponse::BadRequest().json(serde_json::json!({
                    "error": format!("Invalid private key: {}", err)
                }));
            }
        };

        if signer.address().as_str() != request.sender {
            return HttpResponse::BadRequest().json(serde_json::json!({
                "error": "Private key does not match sender address"
            }));
        }

        transaction = match transaction.signed_by(&signer) {
            Ok(signed) => signed,
            Err(err) => {
                return HttpResponse::BadRequest().json(serde_json::json!({
                    "error": format!("Failed to sign transaction: {}", err)
                }));
            }
        };
    }

    let transaction_id = transaction.id.clone();
    if !state.node.submit_transaction(transaction).await {
        return HttpResponse::BadRequest().json(serde_json::json!({
            "error": "Transaction rejected: sender, recipient and a positive amount are required"
        }));
    }

    HttpResponse::Created().json(TransactionResponse {
        message: "Transaction will be added to Block".to_string(),
        transaction_id,
        block_index: state.ledger.len() as u64,
    })
}

/// Mine a new block
///
/// Produces a block from the whole pending pool and announces it
#[utoipa::path(
    post,
    path = "/api/v1/mine",
    request_body = MineRequest,
    responses(
        (status = 200, description = "Block mined successfully", body = MineResponse),
        (status = 409, description = "The chain moved on while mining"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn mine_block(state: AppData, mine_req: Option<web::Json<MineRequest>>) -> impl Responder {
    let miner_address = mine_req
        .and_then(|req| req.into_inner().miner_address)
        .unwrap_or_else(|| state.miner.miner_address().to_string());

    let ledger = state.ledger.clone();
    let address = miner_address.clone();
    let produced = match web::block(move || ledger.produce_block(&address)).await {
        Ok(produced) => produced,
        Err(err) => {
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": format!("Mining task failed: {}", err)
            }));
        }
    };

    let block = match produced {
        Ok(block) => block,
        Err(err @ crate::blockchain::LedgerError::StaleTip { .. }) => {
            return HttpResponse::Conflict().json(serde_json::json!({
                "error": format!("Failed to mine block: {}", err)
            }));
        }
        Err(err) => {
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": format!("Failed to mine block: {}", err)
            }));
        }
    };

    info!("Block {} mined on request for {}", block.index, miner_address);
    if let Err(err) = state.node.announce_block(&block).await {
        warn!("Block {} mined but not announced: {}", block.index, err);
    }

    HttpResponse::Ok().json(MineResponse {
        message: "New Block Mined".to_string(),
        block,
    })
}

/// Check if the blockchain is valid
#[utoipa::path(
    get,
    path = "/api/v1/validate",
    responses(
        (status = 200, description = "Blockchain validation status", body = bool)
    )
)]
pub async fn validate_chain(state: AppData) -> impl Responder {
    HttpResponse::Ok().json(state.ledger.validate_chain())
}

/// Get the balance of an address
///
/// Sums every committed transaction touching the address
#[utoipa::path(
    get,
    path = "/api/v1/balance/{address}",
    params(
        ("address" = String, Path, description = "Address to look up")
    ),
    responses(
        (status = 200, description = "Balance computed", body = BalanceResponse)
    )
)]
pub async fn get_balance(state: AppData, address: web::Path<String>) -> impl Responder {
    let address = address.into_inner();
    let balance = state.ledger.balance_of(&address);

    HttpResponse::Ok().json(BalanceResponse { address, balance })
}

/// List the known peers of this node
#[utoipa::path(
    get,
    path = "/api/v1/peers",
    responses(
        (status = 200, description = "Known peers", body = PeersResponse)
    )
)]
pub async fn get_peers(state: AppData) -> impl Responder {
    HttpResponse::Ok().json(PeersResponse {
        node_id: state.node.node_id().to_string(),
        listen_address: state.node.listen_address(),
        peers: state.node.peers(),
    })
}

/// Get the miner status
#[utoipa::path(
    get,
    path = "/api/v1/miner",
    responses(
        (status = 200, description = "Miner status", body = MinerStatusResponse)
    )
)]
pub async fn get_miner(state: AppData) -> impl Responder {
    HttpResponse::Ok().json(miner_status(&state.miner))
}

/// Start the background miner
#[utoipa::path(
    post,
    path = "/api/v1/miner/start",
    responses(
        (status = 200, description = "Miner running", body = MinerStatusResponse)
    )
)]
pub async fn start_miner(state: AppData) -> impl Responder {
    if !state.miner.start() {
        info!("Miner start requested but it is already running");
    }
    HttpResponse::Ok().json(miner_status(&state.miner))
}

/// Stop the background miner
#[utoipa::path(
    post,
    path = "/api/v1/miner/stop",
    responses(
        (status = 200, description = "Miner stopped", body = MinerStatusResponse)
    )
)]
pub async fn stop_miner(state: AppData) -> impl Responder {
    if !state.miner.stop() {
        info!("Miner stop requested but it is not running");
    }
    HttpResponse::Ok().json(miner_status(&state.miner))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::configure_routes;
    use crate::config::{LedgerConfig, MinerConfig, NodeConfig};
    use crate::network::LocalTransport;
    use actix_web::{test, App};

    async fn test_state() -> AppData {
        let ledger = Ledger::new(LedgerConfig::with_difficulty(1));
        let node = Arc::new(Node::new(ledger.clone(), LocalTransport::new(), NodeConfig::default()));
        node.start("api-node").await.unwrap();
        let miner = Arc::new(Miner::new(ledger.clone(), node.clone(), MinerConfig::default()));

        web::Data::new(AppState { ledger, node, miner })
    }

    #[actix_web::test]
    async fn test_transaction_then_mine_updates_balances() {
        let state = test_state().await;
        let app = test::init_service(App::new().app_data(state.clone()).configure(configure_routes)).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/transactions/new")
            .set_json(serde_json::json!({ "sender": "alice", "recipient": "bob", "amount": 50, "fee": 1 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 201);

        let req = test::TestRequest::post()
            .uri("/api/v1/mine")
            .set_json(serde_json::json!({ "miner_address": "miner1" }))
            .to_request();
        let resp: MineResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.block.index, 1);
        assert_eq!(resp.block.transactions.len(), 2);

        let req = test::TestRequest::get().uri("/api/v1/balance/bob").to_request();
        let resp: BalanceResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.balance, 50);

        let req = test::TestRequest::get().uri("/api/v1/chain").to_request();
        let resp: ChainResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.length, 2);
        assert!(resp.is_valid);
    }

    #[actix_web::test]
    async fn test_invalid_transaction_is_rejected() {
        let state = test_state().await;
        let app = test::init_service(App::new().app_data(state.clone()).configure(configure_routes)).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/transactions/new")
            .set_json(serde_json::json!({ "sender": "alice", "recipient": "bob", "amount": 0 }))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), 400);
        assert_eq!(state.ledger.pending_len(), 0);
    }

    #[actix_web::test]
    async fn test_signed_transaction_requires_matching_key() {
        let state = test_state().await;
        let app = test::init_service(App::new().app_data(state.clone()).configure(configure_routes)).await;

        let signer = Ed25519Signer::generate();
        let key = signer.secret_key_hex();

        let req = test::TestRequest::post()
            .uri("/api/v1/transactions/new")
            .set_json(serde_json::json!({
                "sender": "someone-else", "recipient": "bob", "amount": 5, "private_key": key
            }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 400);

        let req = test::TestRequest::post()
            .uri("/api/v1/transactions/new")
            .set_json(serde_json::json!({
                "sender": signer.address().as_str(), "recipient": "bob", "amount": 5, "private_key": key
            }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 201);

        let pending = state.ledger.pending_snapshot();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].verify_signature().unwrap());
    }

    #[actix_web::test]
    async fn test_miner_endpoints_toggle_state() {
        let state = test_state().await;
        let app = test::init_service(App::new().app_data(state.clone()).configure(configure_routes)).await;

        let req = test::TestRequest::post().uri("/api/v1/miner/start").to_request();
        let resp: MinerStatusResponse = test::call_and_read_body_json(&app, req).await;
        assert!(resp.active);
        assert_eq!(resp.address, "miner");

        let req = test::TestRequest::post().uri("/api/v1/miner/stop").to_request();
        let resp: MinerStatusResponse = test::call_and_read_body_json(&app, req).await;
        assert!(!resp.active);

        let req = test::TestRequest::get().uri("/api/v1/peers").to_request();
        let resp: PeersResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.listen_address.as_deref(), Some("api-node"));
        assert!(resp.peers.is_empty());
    }
}
