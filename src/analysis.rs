//! Analysis orchestrator.
//!
//! Ties together loading, CFG construction, symbolic execution and pattern
//! matching. Every function runs in isolation with its own Z3 context; a
//! failure or panic in one is recorded as a problem and its siblings still
//! run.

use crate::cfg::CfgBuilder;
use crate::contract::{ContractIr, FunctionIr};
use crate::engine::{ExplorationLimits, SymbolicExecutionEngine};
use crate::errors::{AnalysisError, DEFAULT_SOLVER_TIMEOUT_MS, DEFAULT_TIMEOUT_SECS, MAX_PATH_COUNT};
use crate::loader;
use crate::matcher::PatternMatcher;
use crate::patterns::Finding;
use crate::render::render_text;
use anyhow::{Context as _, Result};
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use z3::{Config, Context};

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Configuration for one analysis run.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub timeout_secs: u64,
    pub max_paths: usize,
    pub solver_timeout_ms: u32,
    pub format: OutputFormat,
    pub color: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_paths: MAX_PATH_COUNT,
            solver_timeout_ms: DEFAULT_SOLVER_TIMEOUT_MS,
            format: OutputFormat::Text,
            color: true,
        }
    }
}

impl AnalysisConfig {
    pub fn limits(&self) -> ExplorationLimits {
        ExplorationLimits {
            max_paths: self.max_paths,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

/// Outcome for one function.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionReport {
    pub contract: String,
    pub function: String,
    pub blocks: usize,
    pub paths: usize,
    /// Candidates seen before merging and pruning.
    pub candidates: usize,
    pub findings: Vec<Finding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FunctionReport {
    fn failed(contract: &ContractIr, function: &FunctionIr, error: String) -> Self {
        Self {
            contract: contract.name.clone(),
            function: function.name.clone(),
            blocks: 0,
            paths: 0,
            candidates: 0,
            findings: Vec::new(),
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    pub functions: Vec<FunctionReport>,
}

impl Report {
    pub fn finding_count(&self) -> usize {
        self.functions.iter().map(|f| f.findings.len()).sum()
    }

    /// `(contract.function, message)` for every function that failed.
    pub fn problems(&self) -> Vec<(String, String)> {
        self.functions
            .iter()
            .filter_map(|f| {
                f.error
                    .as_ref()
                    .map(|e| (format!("{}.{}", f.contract, f.function), e.clone()))
            })
            .collect()
    }
}

/// Result of an analysis run.
#[derive(Debug)]
pub struct Analysis {
    pub text: String,
    pub report: Report,
}

/// Build, explore and match one function, then prune its findings.
pub fn run_function(
    contract: &ContractIr,
    function: &FunctionIr,
    config: &AnalysisConfig,
) -> Result<FunctionReport, AnalysisError> {
    let z3_config = Config::new();
    let ctx = Context::new(&z3_config);

    let mut cfg = CfgBuilder::new(&contract.name, function).build();
    let mut matcher = PatternMatcher::new(&ctx, config.solver_timeout_ms);
    let stats = SymbolicExecutionEngine::new(&ctx, contract, function, &mut matcher, config.limits())
        .execute(&mut cfg)?;
    matcher.remove_false_positives(&cfg);
    log::debug!("{}.{}\n{matcher}", contract.name, function.name);

    let findings = matcher
        .patterns()
        .iter()
        .map(|p| {
            let mut finding = p.to_finding();
            finding.source = function.node(p.instruction).and_then(|n| n.source());
            finding
        })
        .collect();

    Ok(FunctionReport {
        contract: contract.name.clone(),
        function: function.name.clone(),
        blocks: cfg.len(),
        paths: stats.paths,
        candidates: matcher.candidate_count(),
        findings,
        error: None,
    })
}

/// [`run_function`] with panics and errors folded into the report.
pub fn analyse_function(
    contract: &ContractIr,
    function: &FunctionIr,
    config: &AnalysisConfig,
) -> FunctionReport {
    match catch_unwind(AssertUnwindSafe(|| run_function(contract, function, config))) {
        Ok(Ok(report)) => report,
        Ok(Err(e)) => {
            log::warn!("{}.{}: {e}", contract.name, function.name);
            FunctionReport::failed(contract, function, e.to_string())
        }
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            log::warn!("{}.{}: analysis panicked: {msg}", contract.name, function.name);
            FunctionReport::failed(contract, function, AnalysisError::Panicked(msg).to_string())
        }
    }
}

/// Analyse the selected functions of already-loaded contracts.
pub fn analyse(
    contracts: &[ContractIr],
    contract: Option<&str>,
    function: Option<&str>,
    config: &AnalysisConfig,
) -> Result<Report> {
    let selected = loader::select(contracts, contract, function)?;
    let functions = selected
        .into_iter()
        .map(|(c, f)| analyse_function(c, f, config))
        .collect();
    Ok(Report { functions })
}

/// Load a JSON IR document and analyse it, rendering per `config.format`.
pub fn analyse_source(
    source: &str,
    contract: Option<&str>,
    function: Option<&str>,
    config: &AnalysisConfig,
) -> Result<Analysis> {
    if source.trim().is_empty() {
        anyhow::bail!("empty input");
    }
    let contracts = loader::load_str(source).context("failed to load IR")?;
    let report = analyse(&contracts, contract, function, config)?;

    let text = match config.format {
        OutputFormat::Json => serde_json::to_string_pretty(&report).context("serialise to JSON")?,
        OutputFormat::Text => render_text(&report, config.color),
    };
    Ok(Analysis { text, report })
}
