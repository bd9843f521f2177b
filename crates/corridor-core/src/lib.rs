//! Tick orchestration and particle dynamics for the corridor simulation.
//!
//! This crate owns the tick cycle that moves truck-units from the sources,
//! through storage lots and the routing fields, to the checkpoint lanes.
//!
//! # Modules
//!
//! - [`clock`] -- Tick counter, simulated time and hour of day.
//! - [`config`] -- Configuration loading into strongly-typed structs.
//! - [`rng`] -- Seeded hash draws and per-lot conversion generators.
//! - [`particles`] -- Particle arena with per-cell occupant lists.
//! - [`congestion`] -- Speed response, jitter and intersection signals.
//! - [`lots`] -- Lot registry and the admission state machine.
//! - [`dwell`] -- Conversion and park release queues.
//! - [`service`] -- Checkpoint service lanes.
//! - [`routing`] -- Installed fields, rebuild scheduling and the worker.
//! - [`drift`] -- Two-pass CFL sub-step mover.
//! - [`invariants`] -- Strict-mode consistency checks.
//! - [`metrics`] -- Counters, snapshots and scenario diffs.
//! - [`scenario`] -- Scenario files and ASCII layouts.
//! - [`tick`] -- The tick cycle.
//! - [`runner`] -- Run loops and parallel scenario comparison.

pub mod clock;
pub mod config;
pub mod congestion;
pub mod drift;
pub mod dwell;
pub mod invariants;
pub mod lots;
pub mod metrics;
pub mod particles;
pub mod rng;
pub mod routing;
pub mod runner;
pub mod scenario;
pub mod service;
pub mod tick;
