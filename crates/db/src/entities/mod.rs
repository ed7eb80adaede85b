//! Defines entities that are to be inserted/tracked in the database.
//!
//! An entity carries its own state machine. Callers move it between states through typed
//! transitions and persist the result, so an illegal move never reaches storage.

pub mod cross_chain_transfer;
pub mod errors;
