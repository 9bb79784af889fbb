//! # World Server Library
//!
//! Authoritative real-time server for a tile-based multiplayer world. Clients
//! connect over a websocket, authenticate with a bearer token, and send
//! movement intents; the server simulates the shared world at a fixed tick
//! rate and streams interest-filtered state deltas back.
//!
//! ## Architecture
//!
//! Three pieces cooperate, wired together in `main`:
//!
//! - The **world** ([`world::World`]) owns every player entity, plans paths
//!   over the tile map, advances movement each tick, and tracks a dirty flag
//!   so quiet ticks cost nothing.
//! - The **session hub** ([`network::Hub`]) owns the client sessions. It
//!   authenticates upgrades, binds each connection one-to-one to a world
//!   entity, pumps inbound intents into the world, and diffs outbound state
//!   per client against what that client last saw.
//! - The **tick driver** ([`tick::Loop`]) couples the two: it steps the world
//!   on a monotonic timer and asks the hub to broadcast only when the world
//!   reports changes.
//!
//! ## Concurrency model
//!
//! The tick driver runs on its own task and the hub spawns a reader and a
//! writer task per client. The world sits behind a readers-writer lock, the
//! hub's session maps behind another; neither lock is ever held across an
//! await point or a socket operation. Per-client outbound queues are bounded
//! and enqueueing never blocks, so a stalled client cannot stall the tick
//! loop. A single client's failure tears down that session only.

pub mod auth;
pub mod map;
pub mod network;
pub mod pathfind;
pub mod tick;
pub mod world;
