#![allow(clippy::too_many_arguments, clippy::manual_range_contains)]

//! Client-side snapshot protocol engine: decodes delta-compressed snapshots
//! from an unreliable transport into a coherent entity table, and uploads
//! commands/events/config in the other direction.
//!
//! Converted from: myq2-original/client/ (cl_parse.c handshake and map
//! messages, cl_ents.c snapshot decode, cl_pred.c command ring, cl_main.c
//! tick loop) — narrowed from a full game client to just the protocol
//! engine these modules implement; rendering, sound, input, and the
//! console/menu UI are outside this engine's scope.

pub mod client;
pub mod command;
pub mod consumer;
pub mod entity;
pub mod framing;
pub mod session;
pub mod snapshot;
pub mod transport;

pub use client::Client;
pub use transport::Transport;
