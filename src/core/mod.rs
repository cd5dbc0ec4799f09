/*!
 * Core Module
 * Fundamental scheduler types, identifiers, limits and error handling
 */

pub mod errors;
pub mod id;
pub mod limits;
pub mod name;
pub mod serde;
pub mod types;

// Re-export for convenience
pub use errors::*;
pub use id::{IdGenerator, ProcessId, ProcessIdGenerator};
pub use name::ProcessName;
pub use types::*;
