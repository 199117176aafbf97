//! Password authentication mechanisms

mod scram;

pub use scram::{ChannelBinding, ScramClient, ScramError, ScramState};
