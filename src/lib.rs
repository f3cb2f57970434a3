//! An asynchronous developer gateway fronting a blockchain-style execution backend.
//!
//! Clients submit deploy/execute requests and event subscriptions; the gateway
//! allocates an id immediately and delivers the outcome later through a
//! per-session mailbox the client polls. The core is backend-agnostic: a
//! [`backend::Backend`] implementation is the only thing that talks to the chain.
//!
//! # Modules
//!
//! - [`sliding_window`] — the bounded, ordered per-key queue underlying every mailbox.
//! - [`actor`] — the generic per-key actor substrate (lazy create, inactivity eviction,
//!   round-robin `execute`, `broadcast`).
//! - [`mailbox`] — per-session message queue built on `actor` + `sliding_window`.
//! - [`events`] — the tagged-union event codec stored in mailbox elements.
//! - [`backend`] — the blockchain RPC capability set, plus the callback capability
//!   set ([`backend::callback`]) and the concrete Alloy-backed implementation
//!   ([`backend::rpc`]).
//! - [`wallet`] — the wallet owner actor ([`wallet::owner`]) and the executor pool
//!   routing `Execute` calls across configured wallets ([`wallet::executor`]).
//! - [`subscriptions`] — per-subscription forwarders draining backend log channels
//!   into mailboxes.
//! - [`request_manager`] — the public façade: id allocation, async dispatch, poll.
//! - [`errors`] — the outward `GatewayError` surface and its HTTP mapping.
//! - [`config`] — CLI + JSON configuration.
//! - [`handlers`] — the Axum HTTP surface.
//! - [`telemetry`] — tracing/OpenTelemetry setup.
//! - [`sig_down`] — graceful shutdown on SIGTERM/SIGINT.

pub mod actor;
pub mod backend;
pub mod config;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod mailbox;
pub mod request_manager;
pub mod sig_down;
pub mod sliding_window;
pub mod subscriptions;
pub mod telemetry;
pub mod wallet;
