//! meshledger node library.
//!
//! Components for building and running a meshledger node. Used by the
//! `meshledger-node` binary and by the integration tests.

pub mod cli;
pub mod config;
pub mod node;
pub mod rpc;
pub mod shutdown;
