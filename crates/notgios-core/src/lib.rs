//! Task-scheduling and control plane for the notgios host-monitoring agent.
//!
//! This crate is transport- and OS-policy-agnostic where it can be: the
//! framing, registry, worker-lifecycle and collector pieces are plain data
//! and `std`/`nix` primitives. The two binary crates, `monitor` and
//! `watchdog`, wire it up to a real socket and a real process tree.

pub mod agent;
pub mod child;
pub mod collector;
pub mod config;
pub mod container;
pub mod control;
pub mod error;
pub mod framing;
pub mod handshake;
pub mod message;
pub mod registry;
pub mod signals;
pub mod stats;
pub mod task;
pub mod worker;

pub use agent::Agent;
pub use config::AgentConfig;
pub use error::{CollectOutcome, ContainerError, HandshakeError, ReadOutcome, WriteOutcome};
pub use registry::Registry;
pub use stats::Stats;
pub use task::{MetricType, Report, TaskAction, TaskDescriptor, TaskId, TaskOption, TaskOptionType, TaskType};
