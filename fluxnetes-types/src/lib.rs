//! Data types shared by the `scheduler` engine and the `fluxnetes` daemon binary.

pub mod labels;
pub mod models;

pub use models::*;
