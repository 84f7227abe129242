//! Bilateral securities transfer instructions: matching, authorization,
//! uniqueness and settlement lifecycle on a versioned sled ledger.

pub mod codec;
pub mod collaborators;
pub mod contract;
pub mod document;
pub mod error;
pub mod instruction;
pub mod ledger;
pub mod logging;
pub mod registry;
pub mod service;
pub mod settings;
pub mod types;
pub mod uniqueness;
pub mod utils;

pub use contract::{InstructionContract, Response};
pub use error::InstructionError;
pub use service::InstructionService;
