//! Live-incident engine for a prison-roleplay game mode: wanted levels,
//! chases between enforcers and suspects, and timed custody with an
//! escape minigame.

pub mod chase_coordinator;
pub mod clock;
pub mod command;
pub mod config;
pub mod custody_controller;
pub mod engine;
pub mod error;
pub mod event;
pub mod minigame;
pub mod rng;
pub mod sandbox;
pub mod snapshot;
pub mod store;
pub mod subsystem;
pub mod types;
pub mod wanted_registry;
pub mod world;
