//! # Session Relay Library
//!
//! This library provides the relay that connects the participants of one
//! shared session. Participants never talk to each other directly; every
//! payload goes through the relay, which forwards it to everyone else.
//!
//! ## Core Responsibilities
//!
//! ### Peer Identity
//! Each participant that connects receives a stable peer id. Ids start at 1
//! and are never reused while the relay runs, because id 0 is reserved by the
//! participants to mean "no master claimed".
//!
//! ### Payload Forwarding
//! A `Broadcast` from one peer is re-sent as a `Forward` to every other peer,
//! tagged with the sender's id and the sender's own sequence number. The relay
//! does not look inside payloads, so it does not need to know the message
//! catalog.
//!
//! ### Membership Notifications
//! Joins and leaves are announced to the remaining peers. A peer that stops
//! sending heartbeats is treated as having left.
//!
//! ## Architecture Design
//!
//! The relay follows a small task-per-concern layout:
//! - **Network Receiver**: reads datagrams and hands decoded packets to the main loop
//! - **Network Sender**: drains the outbound queue and fans broadcasts out
//! - **Timeout Checker**: drops peers that have gone quiet
//! - **Main Loop**: owns the membership decisions
//!
//! ## Module Organization
//!
//! ### Peer Manager Module (`peer_manager`)
//! Id assignment, address lookup, liveness and capacity.
//!
//! ### Network Module (`network`)
//! The UDP relay itself.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     // Relay for up to 8 participants
//!     let mut server = Server::new("127.0.0.1:20602", 8).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod network;
pub mod peer_manager;
