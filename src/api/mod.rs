// API module
//
// HTTP surface of the node: chain inspection, transaction submission,
// manual mining and miner control

pub mod handlers;
pub mod routes;

pub use handlers::{AppData, AppState};
pub use routes::configure_routes;
