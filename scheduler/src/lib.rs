//! Coscheduled group admission engine: Persistent Store, Group Assembler, Job
//! Queue, Allocation/Cleanup Workers, Scheduling Strategy, and Plugin Façade.

pub mod error;
pub mod facade;
pub mod group;
pub mod matcher;
pub mod queue;
pub mod store;
pub mod strategy;
pub mod workers;

pub use error::InvariantError;
pub use facade::PluginFacade;
pub use group::GroupAssembler;
pub use matcher::{MatcherClient, MatcherConfig};
pub use store::{EtcdStore, Store};
pub use strategy::{Strategy, StrategyKind};
