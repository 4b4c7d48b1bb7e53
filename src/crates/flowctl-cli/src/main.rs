//! # flowctl
//!
//! CLI front-end for the `flowctl-core` component-graph controller.
//!
//! This binary is deliberately thin: it owns document loading from disk,
//! signal handling, and console reporting, and hands everything else —
//! graph construction, evaluation, scheduling — to [`flowctl_core::Controller`].
//! It carries no real component implementations of its own (those are an
//! external collaborator per the controller's scope), so `run` and `dot`
//! register a generic passthrough component for whatever types a document
//! actually names, which is enough to exercise graph topology, reference
//! resolution and exports propagation without a real telemetry agent
//! behind it. See `DESIGN.md` for why that choice was made here rather
//! than in the library.

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use flowctl_core::component::{Component, RunContext};
use flowctl_core::controller::{Controller, ControllerOptions};
use flowctl_core::document::Document;
use flowctl_core::registry::{ComponentRegistry, GlobalsBase, HttpHandler, MetricsScope};
use flowctl_core::schema::{ComponentSchema, FieldKind, FieldSchema};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "flowctl")]
#[command(about = "Component-graph controller for a telemetry agent", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and reconcile a document once, report diagnostics, and exit.
    Validate {
        /// Path to a flowctl document (YAML).
        file: PathBuf,
    },

    /// Construct a controller from a document and run it until interrupted.
    Run {
        /// Path to a flowctl document (YAML).
        file: PathBuf,
    },

    /// Render a document's dependency graph as Graphviz `dot`.
    Dot {
        /// Path to a flowctl document (YAML).
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("flowctl=info".parse()?))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Validate { file } => validate(&file).await,
        Commands::Run { file } => run(&file).await,
        Commands::Dot { file } => dot(&file).await,
    }
}

async fn validate(file: &PathBuf) -> anyhow::Result<()> {
    let document = Document::from_file(file)?;
    let mut controller = Controller::new(options_for(&document));
    let report = controller.load(&document).await?;
    print_report(&report);
    controller.close().await?;

    if !report.accepted {
        std::process::exit(1);
    }
    Ok(())
}

async fn run(file: &PathBuf) -> anyhow::Result<()> {
    let document = Document::from_file(file)?;
    let mut controller = Controller::new(options_for(&document));
    let report = controller.load(&document).await?;
    print_report(&report);

    if !report.accepted {
        controller.close().await?;
        std::process::exit(1);
    }

    info!("controller running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    for component in controller.component_infos().await {
        println!("{}: health={} exports={}", component.id, component.health.state, component.exports);
    }
    controller.close().await?;
    Ok(())
}

async fn dot(file: &PathBuf) -> anyhow::Result<()> {
    let document = Document::from_file(file)?;
    let mut controller = Controller::new(options_for(&document));
    let report = controller.load(&document).await?;
    if !report.accepted {
        print_report(&report);
        controller.close().await?;
        std::process::exit(1);
    }

    print!("{}", controller.graph_dot().await);
    controller.close().await?;
    Ok(())
}

fn print_report(report: &flowctl_core::LoadReport) {
    println!("accepted: {}", report.accepted);
    if !report.diagnostics.is_empty() {
        println!("diagnostics:");
        for d in &report.diagnostics {
            println!("  - {d}");
        }
    }
    if !report.added.is_empty() {
        println!("added: {}", report.added.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "));
    }
    if !report.removed.is_empty() {
        println!("removed: {}", report.removed.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "));
    }
}

/// Build controller options carrying a [`ComponentRegistry`] with one
/// passthrough registration per distinct component type the document
/// names, schema'd against the exact argument keys that type's blocks use.
///
/// This crate has no real scrapers or remote-writers to register — those
/// live in an agent binary built on top of `flowctl-core` — so `run` and
/// `dot` need *something* registered or every block would be rejected as
/// an unregistered type before the graph could even be built.
fn options_for(document: &Document) -> ControllerOptions {
    let mut arguments_by_type: BTreeMap<String, BTreeMap<String, FieldSchema>> = BTreeMap::new();
    for block in &document.blocks {
        let fields = arguments_by_type.entry(block.component_type.clone()).or_default();
        for key in block.arguments.keys() {
            fields.entry(key.clone()).or_insert(FieldSchema { kind: FieldKind::Any, required: false, default: Some(Value::Null) });
        }
    }

    let mut registry = ComponentRegistry::new();
    for (component_type, arguments) in arguments_by_type {
        registry.register(
            component_type,
            ComponentSchema { arguments, exports: BTreeMap::new() },
            Arc::new(|_globals, _args| Ok(Box::new(Passthrough) as Box<dyn Component>)),
        );
    }

    ControllerOptions {
        registry,
        globals: GlobalsBase::new(std::env::temp_dir().join("flowctl"), None, Arc::new(NoopMetrics), Arc::new(NoopHttp)),
    }
}

/// Mirrors whatever arguments it's given back out as exports and otherwise
/// does nothing. Stands in for a real component when `flowctl-cli` is used
/// to smoke-test a document's topology rather than run it against an agent
/// binary's actual components.
struct Passthrough;

#[async_trait]
impl Component for Passthrough {
    async fn update(&self, args: Value) -> Result<Value, String> {
        Ok(args)
    }

    async fn run(&self, ctx: RunContext) -> Result<(), String> {
        ctx.cancellation.cancelled().await;
        Ok(())
    }
}

struct NoopMetrics;
impl MetricsScope for NoopMetrics {
    fn scoped(&self, _node: &str) -> Arc<dyn MetricsScope> {
        Arc::new(NoopMetrics)
    }
}

struct NoopHttp;
impl HttpHandler for NoopHttp {
    fn handle(&self, _path: &str) -> String {
        String::new()
    }
}
