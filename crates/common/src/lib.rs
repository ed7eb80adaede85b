//! Crate includes reusable utils for services that handle common behavior.
//! Such as initializing the tracing framework.

pub mod logging;
