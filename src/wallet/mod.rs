//! Wallet owner pool and transaction executor (components D and E).

pub mod executor;
pub mod owner;
