#![cfg_attr(not(test), deny(clippy::panic))]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::too_many_arguments,
    clippy::too_many_lines
)]

//! # Warlane Server
//!
//! Server-side backbone for a session-based team combat game: an
//! authentication service, a matchmaking coordinator, and a dedicated
//! simulation server, all speaking small fixed-layout UDP datagrams.
//!
//! Each service is a single long-lived event loop that owns its sockets and
//! state; there is no shared memory between processes, only the wire.

/// Account, session and login-failure storage plus the auth request handler
pub mod auth;

/// Server configuration: JSON file overrides on top of code defaults
pub mod config;

/// Matchmaking coordinator: queue, lobbies, server pool, reconnect directory
pub mod coordinator;

/// Dedicated game server: authoritative world, client sessions, snapshot fanout
pub mod game;

/// Structured logging configuration
pub mod logging;

/// Non-blocking datagram endpoint
pub mod net;

/// Binary wire protocol definitions (auth, matchmaking, game families)
pub mod proto;
