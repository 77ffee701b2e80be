//! The `utils` module holds the pieces shared by every layer of the relay:
//! the error taxonomy and logging initialisation.

pub mod error;
pub mod logging;

pub use error::RelayError;
