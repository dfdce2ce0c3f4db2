//! # Twin Sync Shared
//! This crate defines shared data structures and types used across the twin
//! synchronization ecosystem. It includes common definitions for digital
//! twins, measurements, model definitions, schema conflicts, and history
//! events.
pub mod types;
