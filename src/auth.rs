//! Identity, scope, token, and authorization-state primitives.

pub mod id;
pub mod scope;
pub mod state;
pub mod token;

pub use id::*;
pub use scope::*;
pub use state::*;
pub use token::*;
