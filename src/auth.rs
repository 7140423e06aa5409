//! Session credentials: token models and the durable credential store.

pub mod credentials;
pub mod token;

pub use credentials::*;
pub use token::{pair::*, secret::*};
