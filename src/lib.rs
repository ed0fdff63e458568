pub mod config;
pub mod types;
pub mod coin_info;
pub mod hold_race;
pub mod notifications;
pub mod rpc_manager;
pub mod snipe_engine;
pub mod trade_gate;
pub mod tx_builder;
pub mod tx_resolver;
pub mod wallet_feed;
