//! Authentication mechanisms

pub mod scram;

pub use scram::{Mechanism, ScramClient, ScramError, ScramState};
