pub mod api;
pub mod cli;
pub mod engine;
pub mod errors;
pub mod instrument;
pub mod ledger;
pub mod orderbook;
pub mod orders;
pub mod scenario;
pub mod state;
pub mod trade;
pub mod utils;
