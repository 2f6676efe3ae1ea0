//! # Session Participant Library
//!
//! This library implements one participant of a shared "musical chairs"
//! session. Participants replicate a table of shared objects, agree on a
//! single game master, and step through rounds whose transitions the master
//! decides and everyone else mirrors.
//!
//! ## Architecture Overview
//!
//! ### Symmetric Local and Remote Paths
//! Every operation exists once. A local call runs it with the session sender
//! as its outbound sink, so the change is applied here and broadcast. When
//! the broadcast arrives at another peer, the dispatcher runs the very same
//! operation there with a sink that sends nothing. Local and remote peers
//! therefore run identical logic.
//!
//! ### Master Authority
//! Only the master evaluates phase exit conditions (deadlines, enough players
//! safe) and decides which reaches of the target count. It broadcasts the
//! result and applies it like every other peer does on receipt. No peer
//! derives a transition on its own.
//!
//! ### Loss Tolerance
//! All traffic is unreliable-sequenced. Per-tick state such as avatar poses
//! heals itself on the next frame; a lost one-shot event is simply lost.
//! Updates for unknown objects are dropped rather than queued.
//!
//! ## Module Organization
//!
//! ### Registry Module (`registry`)
//! The replicated object table and the [`registry::SceneHooks`] seam for
//! rendering, physics and audio.
//!
//! ### Directory Module (`directory`)
//! Peer ids present in the session and their avatar objects.
//!
//! ### Coordinator Module (`coordinator`)
//! Master election and the round phase machine.
//!
//! ### Dispatcher Module (`dispatcher`)
//! Outbound sinks and the inbound handler table.
//!
//! ### Network Module (`network`)
//! The [`network::Transport`] trait and its UDP implementation talking to the
//! relay. The `hub` module provides an in-process transport.
//!
//! ### Session Module (`session`)
//! The context struct tying everything together.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::config::GameConfig;
//! use client::network;
//! use client::session::Session;
//! use std::time::Instant;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (transport, link) = network::connect("127.0.0.1:20602").await?;
//!     tokio::spawn(link.run());
//!
//!     let mut session = Session::new(transport, GameConfig::default());
//!
//!     loop {
//!         let now = Instant::now();
//!         session.poll(now);
//!         session.tick(now);
//!
//!         for event in session.drain_events() {
//!             println!("{:?}", event);
//!         }
//!
//!         tokio::time::sleep(std::time::Duration::from_millis(33)).await;
//!     }
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod directory;
pub mod dispatcher;
pub mod hub;
pub mod network;
pub mod registry;
pub mod session;
