//! # Arena Game Server Library
//!
//! This library provides the authoritative backend for the platform's
//! real-time two-player arcade game: matchmaking, session lifecycle, the
//! fixed-rate physics simulation, and the realtime gateway that keeps
//! connected clients synchronized.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! The server runs the only copy of the game physics. Clients submit
//! paddle inputs and receive per-tick state snapshots; nothing a client
//! sends can place the ball or move the score directly.
//!
//! ### Matchmaking
//! Players either wait in a FIFO queue that a periodic matchmaking tick
//! drains into fresh sessions, or challenge each other directly through
//! the invite/accept path. Both roads lead to the same session registry.
//!
//! ### Session Lifecycle
//! A session moves Waiting -> Playing -> Ended and is owned exclusively by
//! the registry: it is created when two players are paired, removed when a
//! player leaves an unstarted room, and removed-then-persisted when a game
//! reaches its target score or is forfeited.
//!
//! ## Architecture Design
//!
//! ### Locking Model
//! Each session is its own mutual-exclusion domain, so the game tick can
//! advance hundreds of independent sessions without serializing on one
//! lock, while a session's ready toggles, inputs, and ticks stay
//! linearizable. The registry's structural map and reverse index form a
//! separate short-held domain, and no code performs external I/O while
//! holding a session lock.
//!
//! ### Periodic Tasks
//! Two independently cancellable timers drive the system: a seconds-scale
//! matchmaking tick and a frame-interval game tick. Both shut down through
//! an explicit signal so no timer outlives the process.
//!
//! ### UDP-Based Gateway
//! The gateway follows an event-driven split: a receiver task decodes
//! datagrams into events, the main loop applies them to the core, and a
//! sender task drains the outbound queue that the scheduler shares.
//!
//! ## Module Organization
//!
//! - [`physics`]: ball and paddle math for one tick
//! - [`session`]: the per-match state machine
//! - [`registry`]: session registry, reverse index, and wait queue
//! - [`scheduler`]: the two periodic tasks
//! - [`gateway`]: wire protocol boundary and connection events
//! - [`connection`]: explicit per-connection context tracking
//! - [`collab`]: seams to the platform's user directory and persistence
//! - [`error`]: the closed failure taxonomy all core operations return

pub mod collab;
pub mod connection;
pub mod error;
pub mod gateway;
pub mod physics;
pub mod registry;
pub mod scheduler;
pub mod session;
