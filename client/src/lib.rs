//! Session layer for an Overte-compatible domain client: configuration,
//! the handshake state machine, service directory and entity stream
//! parsing, and the poll-driven UDP loop that ties them together.
//!
//! The crate is single-threaded by design. [`client::DomainClient::poll`]
//! drains the socket, dispatches inbound packets, and fires due timers in
//! one synchronous pass; [`client::DomainClient::run`] is a thin async
//! driver that calls it on socket readiness or a coarse tick. Rendering,
//! asset downloads and authentication are collaborator seams
//! ([`assets::AssetFetcher`], [`credentials::CredentialsProvider`]), not
//! part of this crate.

pub mod assets;
pub mod client;
pub mod config;
pub mod credentials;
pub mod directory;
pub mod discovery;
pub mod entities;
pub mod handshake;
pub mod session;
