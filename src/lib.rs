pub mod audit;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod device;
pub mod envelope;
pub mod errors;
pub mod platform;
pub mod session;
pub mod vault;
