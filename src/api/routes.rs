use actix_web::web;

use super::handlers;

/// Mounts every endpoint under `/api/v1`
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/chain", web::get().to(handlers::get_chain))
            .route("/transactions/pending", web::get().to(handlers::get_pending_transactions))
            .route("/transactions/new", web::post().to(handlers::new_transaction))
            .route("/mine", web::post().to(handlers::mine_block))
            .route("/validate", web::get().to(handlers::validate_chain))
            .route("/balance/{address}", web::get().to(handlers::get_balance))
            .route("/peers", web::get().to(handlers::get_peers))
            .route("/miner", web::get().to(handlers::get_miner))
            .route("/miner/start", web::post().to(handlers::start_miner))
            .route("/miner/stop", web::post().to(handlers::stop_miner)),
    );
}
