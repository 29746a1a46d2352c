//! LSNP protocol engine: frame codec, peer table, reliability, and the
//! social/file/group/game feature modules, wired together by `Controller`.
//!
//! This crate is transport-agnostic in the same sense `webrtc-network` is:
//! it owns the UDP socket but exposes one method per user-facing
//! operation, leaving the REPL/process shell (the `node` crate) to own
//! `main` and argument parsing.

pub mod codec;
pub mod config;
pub mod controller;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod filetransfer;
pub mod game;
pub mod groups;
pub mod peer;
pub mod periodic;
pub mod reliability;
pub mod social;
pub mod token;
pub mod transport;

pub use config::LsnpConfig;
pub use controller::Controller;
pub use error::{LsnpError, Result};
