//! # flowctl-core — the component-graph controller for a telemetry agent
//!
//! A telemetry agent is configured as a set of named, typed *components*
//! (service-discovery producers, scrape jobs, relabeling stages, remote-write
//! sinks, ...) that read each other's outputs by symbolic reference. This
//! crate is the controller that turns a parsed configuration document into a
//! running graph of concurrently-executing components, keeps it converging
//! as component outputs change, and reconciles it against hot reloads.
//!
//! It does **not** implement any component itself, and it does not parse a
//! configuration *language* — it consumes an already-parsed [`document`] of
//! blocks and expressions. Those are the two collaborators a real agent
//! binary supplies.
//!
//! ## Subsystems
//!
//! - [`graph`] — the dependency DAG: add/remove nodes, derive edges from
//!   references, topological order, cycle detection, reachability.
//! - [`queue`] — a coalescing, edge-triggered work queue of nodes awaiting
//!   re-evaluation.
//! - [`component`] — [`component::ComponentNode`], the live wrapper around one
//!   component instance: its arguments, exports, health, and the
//!   [`component::Component`] trait components implement.
//! - [`loader`] — [`loader::Loader`], which owns the [`graph::Graph`] and
//!   performs full (`apply`) and partial (`evaluate_dependencies`)
//!   reconciliation.
//! - [`scheduler`] — [`scheduler::Scheduler`], which owns one worker task per
//!   component and diffs desired vs. running sets across reloads.
//! - [`controller`] — [`controller::Controller`], the top-level event loop
//!   binding the four subsystems together.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use flowctl_core::controller::{Controller, ControllerOptions};
//!
//! # async fn example() -> Result<(), flowctl_core::error::ControllerError> {
//! let mut controller = Controller::new(ControllerOptions::default());
//! let report = controller.load_file("agent.flow.yaml").await?;
//! assert!(report.accepted);
//! controller.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod component;
pub mod controller;
pub mod document;
pub mod error;
pub mod graph;
pub mod health;
pub mod id;
pub mod loader;
pub mod queue;
pub mod registry;
pub mod schema;
pub mod scheduler;

pub use controller::{Controller, ControllerOptions};
pub use error::{ControllerError, Result};
pub use graph::Graph;
pub use health::Health;
pub use id::NodeId;
pub use loader::{LoadReport, Loader};
pub use queue::Queue;
pub use scheduler::Scheduler;
