//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use relsim_core::{
    CayleyEngine, Checkpoint, DivergenceGuard, EdgeList, EngineConfig, ModuleRegistry,
    PhysicsPipeline, RelsimError, RunSummary, SoftRewiring, SparseTopology, TopologyMetrics,
    checkpoint_checksum, checkpoint_from_bytes, checkpoint_to_bytes, compact,
    formats::MAX_CHECKPOINT_SIZE,
};
use std::path::{Path, PathBuf};

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum topology file size (256 MB).
const MAX_TOPOLOGY_FILE_SIZE: u64 = 256 * 1024 * 1024;

/// Maximum config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), RelsimError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| RelsimError::IoError(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(RelsimError::IoError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Resolve an input path to a canonical regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, RelsimError> {
    let canonical = path.canonicalize().map_err(|e| {
        RelsimError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(RelsimError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Resolve an output path. The parent directory must exist.
fn validate_output_path(path: &Path) -> Result<PathBuf, RelsimError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        RelsimError::IoError(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    let file_name = path.file_name().ok_or_else(|| {
        RelsimError::IoError(format!("Output path '{}' has no file name", path.display()))
    })?;

    Ok(canonical_parent.join(file_name))
}

/// Read a whole file after path and size validation.
fn read_validated(path: &Path, max_size: u64) -> Result<Vec<u8>, RelsimError> {
    let validated = validate_file_path(path)?;
    validate_file_size(&validated, max_size)?;
    std::fs::read(&validated).map_err(|e| RelsimError::IoError(format!("Read file: {}", e)))
}

fn write_validated(path: &Path, data: &[u8]) -> Result<PathBuf, RelsimError> {
    let validated = validate_output_path(path)?;
    std::fs::write(&validated, data)
        .map_err(|e| RelsimError::IoError(format!("Write file: {}", e)))?;
    Ok(validated)
}

fn print_json(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

// =============================================================================
// FILE LOADERS
// =============================================================================

/// Load an [`EngineConfig`] from TOML, or the defaults when no path is given.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig, RelsimError> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };

    let bytes = read_validated(path, MAX_CONFIG_FILE_SIZE)?;
    let text = String::from_utf8(bytes)
        .map_err(|e| RelsimError::DeserializationError(format!("Config is not UTF-8: {}", e)))?;
    let config: EngineConfig = toml::from_str(&text)
        .map_err(|e| RelsimError::DeserializationError(format!("Config: {}", e)))?;
    config.validate()?;

    tracing::debug!(path = %path.display(), "loaded engine config");
    Ok(config)
}

/// Load a JSON edge list and build its topology.
pub fn load_topology(path: &Path) -> Result<SparseTopology, RelsimError> {
    let bytes = read_validated(path, MAX_TOPOLOGY_FILE_SIZE)?;
    let list: EdgeList = serde_json::from_slice(&bytes)
        .map_err(|e| RelsimError::DeserializationError(format!("Topology: {}", e)))?;
    SparseTopology::from_edge_list(&list)
}

/// Read and parse a checkpoint file.
pub fn read_checkpoint(path: &Path) -> Result<Checkpoint, RelsimError> {
    let bytes = read_validated(path, MAX_CHECKPOINT_SIZE as u64)?;
    checkpoint_from_bytes(&bytes)
}

fn write_topology(list: &EdgeList, path: &Path) -> Result<PathBuf, RelsimError> {
    let data = serde_json::to_vec_pretty(list)
        .map_err(|e| RelsimError::SerializationError(e.to_string()))?;
    write_validated(path, &data)
}

fn print_metrics(metrics: &TopologyMetrics) {
    println!("Nodes:         {}", metrics.node_count);
    println!("Edges:         {}", metrics.edge_count);
    println!("Isolated:      {}", metrics.isolated_nodes);
    println!(
        "Degree:        min {} / max {} / mean {:.3}",
        metrics.min_degree, metrics.max_degree, metrics.mean_degree
    );
    println!(
        "Weight:        min {:.6} / max {:.6} / mean {:.6}",
        metrics.min_weight, metrics.max_weight, metrics.mean_weight
    );
}

// =============================================================================
// RUN COMMAND
// =============================================================================

/// Where a run takes its initial engine from.
#[derive(Debug, Clone)]
pub enum RunSource {
    /// Fresh engine on a JSON topology, uniform initial state.
    Topology(PathBuf),
    /// Engine restored from a checkpoint.
    Checkpoint(PathBuf),
}

/// Parameters of `relsim run`.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub source: RunSource,
    pub steps: u64,
    pub dt: f64,
    /// Ignored when resuming; the checkpoint carries its own.
    pub gauge_dim: usize,
    pub mass: Option<f64>,
    /// Overrides `EngineConfig::weight_threshold`.
    pub soft_threshold: Option<f64>,
    pub soft_interval: u64,
    pub guard: Option<usize>,
    pub save: Option<PathBuf>,
}

/// Build the engine and modules, run, then optionally save a checkpoint.
pub fn cmd_run(
    config: &EngineConfig,
    options: &RunOptions,
    json_mode: bool,
) -> Result<RunSummary, RelsimError> {
    let mut engine = CayleyEngine::new(config.clone())?;
    match &options.source {
        RunSource::Topology(path) => {
            let topology = load_topology(path)?;
            engine.initialize_with_topology(topology, options.gauge_dim)?;
        }
        RunSource::Checkpoint(path) => {
            engine.restore(read_checkpoint(path)?)?;
        }
    }

    if let Some(mass) = options.mass {
        let n = engine.topology()?.node_count();
        engine.set_node_mass(&vec![mass; n])?;
    }

    // Falls back to the configured cutoff; 0 registers no module.
    let soft_threshold = options
        .soft_threshold
        .or((config.weight_threshold > 0.0).then_some(config.weight_threshold));

    let mut registry = ModuleRegistry::new();
    if let Some(threshold) = soft_threshold {
        registry.register(Box::new(SoftRewiring::new(
            threshold,
            options.soft_interval,
        )?));
    }
    if let Some(max) = options.guard {
        registry.register(Box::new(DivergenceGuard::new(max)));
    }

    let mut pipeline = PhysicsPipeline::new(engine, registry);
    tracing::info!(
        steps = options.steps,
        dt = options.dt,
        modules = ?pipeline.registry().names(),
        "starting run"
    );
    let summary = pipeline.run(options.steps, options.dt)?;
    let engine = pipeline.into_engine();
    let metrics = TopologyMetrics::from_topology(engine.topology()?)?;

    let saved = match &options.save {
        Some(path) => {
            let bytes = checkpoint_to_bytes(&engine.checkpoint()?)?;
            let written = write_validated(path, &bytes)?;
            tracing::info!(path = %written.display(), bytes = bytes.len(), "checkpoint saved");
            Some(written)
        }
        None => None,
    };

    if json_mode {
        let output = serde_json::json!({
            "tick": engine.tick(),
            "generation": engine.generation(),
            "summary": summary,
            "topology": metrics,
            "checkpoint": saved.as_ref().map(|p| p.to_string_lossy().into_owned()),
        });
        print_json(&output);
        return Ok(summary);
    }

    println!("relsim Run");
    println!("==========");
    println!("Ticks:         {} (engine tick {})", summary.ticks, engine.tick());
    println!("Iterations:    {}", summary.total_iterations);
    println!("Max residual:  {:.3e}", summary.max_residual);
    println!("Unconverged:   {}", summary.unconverged_ticks);
    println!("Unhealthy:     {}", summary.unhealthy_ticks);
    println!("Rebuilds:      {} (generation {})", summary.rebuilds, engine.generation());
    println!("Final norm:    {:.12}", summary.final_norm);
    if let Some(reason) = &summary.halted {
        println!("Halted:        {}", reason);
    }
    println!();
    print_metrics(&metrics);
    if let Some(path) = saved {
        println!();
        println!("Checkpoint written to {:?}", path);
    }

    Ok(summary)
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show topology metrics.
pub fn cmd_status(topology: &Path, json_mode: bool) -> Result<(), RelsimError> {
    let topo = load_topology(topology)?;
    let metrics = TopologyMetrics::from_topology(&topo)?;

    if json_mode {
        let output = serde_json::json!({
            "topology": topology.to_string_lossy(),
            "metrics": metrics,
        });
        print_json(&output);
        return Ok(());
    }

    println!("relsim Topology Status");
    println!("======================");
    println!("File: {:?}", topology);
    println!();
    print_metrics(&metrics);

    Ok(())
}

// =============================================================================
// COMPACT COMMAND
// =============================================================================

/// Drop edges below `threshold` and write the result as JSON.
pub fn cmd_compact(
    topology: &Path,
    threshold: f64,
    output: &Path,
    json_mode: bool,
) -> Result<(), RelsimError> {
    let topo = load_topology(topology)?;
    let before = topo.undirected_edge_count();
    let compacted = compact(&topo, threshold)?.unwrap_or(topo);
    let after = compacted.undirected_edge_count();

    let written = write_topology(&compacted.to_edge_list(), output)?;
    tracing::info!(before, after, threshold, "compacted topology");

    if json_mode {
        let output = serde_json::json!({
            "edges_before": before,
            "edges_after": after,
            "removed": before - after,
            "output": written.to_string_lossy(),
        });
        print_json(&output);
        return Ok(());
    }

    println!(
        "Removed {} of {} edges below {}; wrote {:?}",
        before - after,
        before,
        threshold,
        written
    );
    Ok(())
}

// =============================================================================
// GENERATE COMMAND
// =============================================================================

/// A regular topology shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Ring(usize),
    Path(usize),
    Grid { width: usize, height: usize },
}

impl Shape {
    /// Parse a shape name; grids need both dimensions.
    pub fn parse(
        name: &str,
        nodes: usize,
        width: Option<usize>,
        height: Option<usize>,
    ) -> Result<Self, RelsimError> {
        match name {
            "ring" => Ok(Self::Ring(nodes)),
            "path" => Ok(Self::Path(nodes)),
            "grid" => match (width, height) {
                (Some(width), Some(height)) => Ok(Self::Grid { width, height }),
                _ => Err(RelsimError::InvalidArgument(
                    "grid needs --width and --height".to_string(),
                )),
            },
            other => Err(RelsimError::InvalidArgument(format!(
                "Unknown shape: {}. Use: ring, path, grid",
                other
            ))),
        }
    }

    fn edge_list(self, weight: f64) -> EdgeList {
        match self {
            Self::Ring(n) => EdgeList::ring(n, weight),
            Self::Path(n) => EdgeList::path(n, weight),
            Self::Grid { width, height } => EdgeList::grid(width, height, weight),
        }
    }
}

/// Write a generated topology as a JSON edge list.
pub fn cmd_generate(
    shape: Shape,
    weight: f64,
    potential: Option<f64>,
    output: &Path,
    json_mode: bool,
) -> Result<(), RelsimError> {
    let mut list = shape.edge_list(weight);
    if let Some(v) = potential {
        let n = list.node_count;
        list = list.with_potential(vec![v; n]);
    }
    // Reject what the engine would reject before writing anything.
    let topo = SparseTopology::from_edge_list(&list)?;

    let written = write_topology(&list, output)?;

    if json_mode {
        let output = serde_json::json!({
            "nodes": topo.node_count(),
            "edges": topo.undirected_edge_count(),
            "output": written.to_string_lossy(),
        });
        print_json(&output);
        return Ok(());
    }

    println!(
        "Generated {:?}: {} nodes, {} edges -> {:?}",
        shape,
        topo.node_count(),
        topo.undirected_edge_count(),
        written
    );
    Ok(())
}

// =============================================================================
// INSPECT COMMAND
// =============================================================================

/// Summarise a checkpoint without building an engine.
pub fn cmd_inspect(input: &Path, json_mode: bool) -> Result<(), RelsimError> {
    let checkpoint = read_checkpoint(input)?;
    let node_count = checkpoint.node_potential.len();
    let norm = checkpoint
        .state
        .iter()
        .map(|a| a.norm_sqr())
        .sum::<f64>()
        .sqrt();

    if json_mode {
        let output = serde_json::json!({
            "tick": checkpoint.tick,
            "generation": checkpoint.generation,
            "steps_since_rebuild": checkpoint.steps_since_rebuild,
            "gauge_dim": checkpoint.gauge_dim,
            "node_count": node_count,
            "nnz": checkpoint.col_indices.len(),
            "state_len": checkpoint.state.len(),
            "norm": norm,
        });
        print_json(&output);
        return Ok(());
    }

    println!("relsim Checkpoint");
    println!("=================");
    println!("File:        {:?}", input);
    println!("Tick:        {}", checkpoint.tick);
    println!("Generation:  {}", checkpoint.generation);
    println!("Gauge dim:   {}", checkpoint.gauge_dim);
    println!("Nodes:       {}", node_count);
    println!("CSR entries: {}", checkpoint.col_indices.len());
    println!("Norm:        {:.12}", norm);

    Ok(())
}

// =============================================================================
// HASH COMMAND
// =============================================================================

/// Compute the BLAKE3 hash of a checkpoint file after checking it parses.
pub fn cmd_hash(input: &Path, json_mode: bool) -> Result<(), RelsimError> {
    let bytes = read_validated(input, MAX_CHECKPOINT_SIZE as u64)?;
    let checkpoint = checkpoint_from_bytes(&bytes)?;
    let hash = checkpoint_checksum(&bytes);

    if json_mode {
        let output = serde_json::json!({
            "hash": hash,
            "algorithm": "BLAKE3",
            "tick": checkpoint.tick,
            "bytes": bytes.len(),
        });
        print_json(&output);
    } else {
        println!("BLAKE3: {}", hash);
    }

    Ok(())
}
