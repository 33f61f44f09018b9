use std::collections::BTreeMap;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lumen_config::EngineConfig;
use lumen_graph::{Graph, NodeId};
use lumen_nodes::{SimulatedDevices, TorchMonitor, builtin_registry};
use lumen_registry::NodeTypeRegistry;
use lumen_runtime::GraphRuntime;
use lumen_signal::BusConfig;

/// Lumen - signal graphs for device automations
#[derive(Parser)]
#[command(name = "lumen")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the engine config (default: ~/.lumen/config.json)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Log level used when RUST_LOG is not set
  #[arg(long, global = true, default_value = "info")]
  log_level: String,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Import a graph and check it without running it
  Validate {
    /// Path to the editor document (JSON)
    graph_file: PathBuf,
  },

  /// Start a graph against simulated devices and fire triggers
  Run {
    /// Path to the editor document (JSON)
    graph_file: PathBuf,

    /// Node to emit a signal from; repeatable
    #[arg(long = "trigger")]
    triggers: Vec<NodeId>,

    /// Signal payload as JSON (default: read from stdin if piped)
    #[arg(long)]
    payload: Option<String>,

    /// Time to let timers and delays run before reporting
    #[arg(long, default_value_t = 0)]
    wait_ms: u64,
  },

  /// Import a graph and export it again with normalized slots
  Export {
    /// Path to the editor document (JSON)
    graph_file: PathBuf,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  tracing_subscriber::registry()
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| cli.log_level.clone().into()),
    )
    .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
    .init();

  let config = load_config(cli.config.as_deref())?;

  let rt = tokio::runtime::Runtime::new()?;
  match cli.command {
    Some(Commands::Validate { graph_file }) => validate(&graph_file, &config),
    Some(Commands::Run {
      graph_file,
      triggers,
      payload,
      wait_ms,
    }) => rt.block_on(async { run_graph(&graph_file, &config, &triggers, payload, wait_ms).await }),
    Some(Commands::Export { graph_file }) => export(&graph_file, &config),
    None => {
      println!("lumen - use --help to see available commands");
      Ok(())
    }
  }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
  let path = match path {
    Some(path) => path.to_path_buf(),
    None => match dirs::home_dir() {
      Some(home) => home.join(".lumen").join("config.json"),
      None => return Ok(EngineConfig::default()),
    },
  };
  if !path.exists() {
    info!(path = %path.display(), "config_not_found_using_defaults");
    return Ok(EngineConfig::default());
  }

  let content = std::fs::read_to_string(&path)
    .with_context(|| format!("failed to read config file: {}", path.display()))?;
  serde_json::from_str(&content)
    .with_context(|| format!("failed to parse config file: {}", path.display()))
}

fn load_graph(graph_file: &Path, config: &EngineConfig) -> Result<Graph> {
  let content = std::fs::read_to_string(graph_file)
    .with_context(|| format!("failed to read graph file: {}", graph_file.display()))?;
  let graph = Graph::from_json_str(&content, &config.default_module)
    .with_context(|| format!("failed to import graph file: {}", graph_file.display()))?;
  eprintln!(
    "Loaded graph: {} nodes, {} edges",
    graph.len(),
    graph.edges().len()
  );
  Ok(graph)
}

fn validate(graph_file: &Path, config: &EngineConfig) -> Result<()> {
  let graph = load_graph(graph_file, config)?;
  let order = graph.topological_order().context("graph cannot be ordered")?;

  let devices = SimulatedDevices::new();
  let registry = builtin_registry(&devices.capabilities())?;
  registry.check_graph(&graph).context("graph uses unsupported node types")?;

  let mut invalid = BTreeMap::new();
  for node in graph.nodes() {
    let Some(behavior) = registry.get(&node.node_type) else {
      continue;
    };
    let settings = registry.settings_for(&node.node_type, &node.config);
    if let Err(e) = behavior.validate(&settings) {
      invalid.insert(node.id, e.to_string());
    }
  }

  println!(
    "{}",
    serde_json::to_string_pretty(&json!({
      "nodes": graph.len(),
      "edges": graph.edges().len(),
      "order": order,
      "invalid": invalid,
    }))?
  );

  if !invalid.is_empty() {
    bail!("{} node(s) have invalid settings", invalid.len());
  }
  Ok(())
}

async fn run_graph(
  graph_file: &Path,
  config: &EngineConfig,
  triggers: &[NodeId],
  payload: Option<String>,
  wait_ms: u64,
) -> Result<()> {
  let graph = load_graph(graph_file, config)?;
  let payload = match payload {
    Some(text) => Some(serde_json::from_str(&text).context("failed to parse --payload JSON")?),
    None => read_payload_from_stdin()?,
  };

  let devices = SimulatedDevices::new();
  let registry = builtin_registry(&devices.capabilities())?;
  let mut runtime = GraphRuntime::with_config(graph, registry, BusConfig::from(config));
  let report = runtime
    .start()
    .await
    .context("failed to start graph")?
    .clone();
  for (node_id, error) in &report.errors {
    warn!(node_id = %node_id, error = %error, "node_not_started");
  }

  let monitor = TorchMonitor::spawn(devices.torch.as_ref(), runtime.bus().clone());

  for node_id in triggers {
    runtime
      .trigger(*node_id, payload.clone())
      .await
      .with_context(|| format!("failed to trigger node {}", node_id))?;
  }
  if wait_ms > 0 {
    tokio::time::sleep(Duration::from_millis(wait_ms)).await;
  }

  let bus = runtime.bus();
  let output = json!({
    "execution_id": report.execution_id,
    "errors": report.errors,
    "stats": bus.stats(),
    "variables": bus.get_all_variables(),
    "devices": {
      "torch": devices.torch.is_on(),
      "vibrations": devices.vibrator.pulses().len(),
    },
  });
  println!("{}", serde_json::to_string_pretty(&output)?);

  drop(monitor);
  runtime.shutdown();
  Ok(())
}

fn export(graph_file: &Path, config: &EngineConfig) -> Result<()> {
  let graph = load_graph(graph_file, config)?;
  let devices = SimulatedDevices::new();
  let registry = builtin_registry(&devices.capabilities())?;

  let mut document = graph.to_document(&config.default_module);
  if let Some(module) = document.drawflow.get_mut(&config.default_module) {
    for node in module.data.values_mut() {
      if let Some(html) = render_node(&registry, node.node_type(), &node.data) {
        node.html = html;
      }
    }
  }

  println!("{}", serde_json::to_string_pretty(&document)?);
  Ok(())
}

fn render_node(
  registry: &NodeTypeRegistry,
  node_type: Option<&str>,
  data: &serde_json::Map<String, Value>,
) -> Option<String> {
  let node_type = node_type?;
  let behavior = registry.get(node_type)?;
  behavior.render(&registry.settings_for(node_type, &Value::Object(data.clone())))
}

fn read_payload_from_stdin() -> Result<Option<Value>> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    return Ok(None);
  }

  let mut input = String::new();
  io::stdin()
    .read_to_string(&mut input)
    .context("failed to read payload from stdin")?;

  if input.trim().is_empty() {
    Ok(None)
  } else {
    serde_json::from_str(&input)
      .map(Some)
      .context("failed to parse payload JSON from stdin")
  }
}
