//! Library surface for the `fluxnetes` daemon binary, split out so integration
//! tests can build an [`scheduler::Engine`] the same way `main` does.

pub mod cli;
pub mod config;
pub mod scheduler;
