//! Collection of generic internal data types that are used widely across the bridge.

pub mod bridge;
pub mod buf;
pub mod constants;
pub mod errors;
pub mod l1;
pub mod multisig;
pub mod params;
