//! # nodelo-shared
//!
//! Domain vocabulary shared by the store and the server: the status and
//! sender enums, attachment kinds, limits, and the input normalisation rules
//! applied to contact submissions and chat messages.

pub mod constants;
pub mod error;
pub mod types;
pub mod validate;

pub use error::ValidationError;
pub use types::*;
