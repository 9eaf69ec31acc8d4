//! Peer-to-peer data transport
//!
//! Bulk payloads move between neighbors over plain HTTP/1.1: every node
//! serves `GET /datareq` and fetches from peers on demand. Meta-notifications
//! never travel here; they go through the coordination store.

pub mod client;
pub mod server;

pub use client::DataClient;
pub use server::{create_router, serve, ServeReply, ServeRequest, DATA_REQUEST_PATH};
