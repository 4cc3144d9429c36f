//! Front-end IR loading and validation.
//!
//! Reads the per-contract JSON the front end emits, checks each function's
//! node graph, and fills in what a hand-written document may leave out:
//! condition operation lists and per-node storage read/write sets. Bodies
//! given as structured statements are lowered to nodes first.

use crate::contract::{CallSummary, ContractIr, FunctionIr, Parameter, StorageVariable, StructDecl};
use crate::errors::IrError;
use crate::ir::{Node, NodeId};
use crate::lower::{lower, lower_condition, storage_effects, Statement};
use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// A whole input document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub contracts: Vec<ContractSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractSource {
    pub name: String,
    #[serde(default)]
    pub storage: Vec<StorageVariable>,
    #[serde(default)]
    pub structs: Vec<StructDecl>,
    #[serde(default)]
    pub functions: Vec<FunctionSource>,
}

/// A node arena rooted at `entry`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeGraph {
    pub entry: NodeId,
    pub nodes: Vec<Node>,
}

/// A function as written: either a node graph or a statement body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSource {
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub pure: bool,
    #[serde(default)]
    pub calls: CallSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<NodeGraph>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statements: Option<Vec<Statement>>,
}

/// Parse and validate a JSON document.
pub fn load_str(source: &str) -> Result<Vec<ContractIr>, IrError> {
    let doc: Document = serde_json::from_str(source)?;
    load_document(doc)
}

pub fn load_path(path: &Path) -> anyhow::Result<Vec<ContractIr>> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    load_str(&source).with_context(|| format!("failed to load {}", path.display()))
}

pub fn load_document(doc: Document) -> Result<Vec<ContractIr>, IrError> {
    if doc.contracts.is_empty() {
        return Err(IrError::EmptyDocument);
    }
    doc.contracts.into_iter().map(build_contract).collect()
}

fn build_contract(src: ContractSource) -> Result<ContractIr, IrError> {
    let storage: BTreeSet<String> = src.storage.iter().map(|v| v.name.clone()).collect();
    let functions = src
        .functions
        .into_iter()
        .map(|f| build_function(f, &storage))
        .collect::<Result<Vec<_>, _>>()?;
    log::debug!("loaded contract {} ({} functions)", src.name, functions.len());
    Ok(ContractIr {
        name: src.name,
        storage: src.storage,
        structs: src.structs,
        functions,
    })
}

fn build_function(src: FunctionSource, storage: &BTreeSet<String>) -> Result<FunctionIr, IrError> {
    let (entry, mut nodes) = match (src.nodes, src.statements) {
        (Some(graph), _) => (graph.entry, graph.nodes),
        (None, Some(body)) => lower(&body, storage),
        (None, None) => return Err(IrError::MissingBody(src.name)),
    };
    validate(&src.name, entry, &nodes)?;
    for node in &mut nodes {
        complete_node(node, storage);
    }
    Ok(FunctionIr {
        name: src.name,
        parameters: src.parameters,
        pure: src.pure,
        calls: src.calls,
        entry,
        nodes,
    })
}

/// Structural checks the CFG builder relies on.
pub fn validate(function: &str, entry: NodeId, nodes: &[Node]) -> Result<(), IrError> {
    if entry >= nodes.len() {
        return Err(IrError::MissingEntry {
            function: function.to_string(),
            entry,
        });
    }
    for (index, node) in nodes.iter().enumerate() {
        if node.id != index {
            return Err(IrError::MisnumberedNode {
                function: function.to_string(),
                node: node.id,
                index,
            });
        }
        if let Some(&target) = node.sons.iter().chain(&node.fathers).find(|&&t| t >= nodes.len()) {
            return Err(IrError::DanglingEdge {
                function: function.to_string(),
                node: node.id,
                target,
            });
        }
        if node.kind.is_two_way() && node.sons.len() != 2 {
            return Err(IrError::MalformedBranch {
                function: function.to_string(),
                kind: node.kind.name(),
                node: node.id,
                found: node.sons.len(),
            });
        }
    }
    Ok(())
}

/// Derive operations and storage sets from the source expression when the
/// document did not supply them.
fn complete_node(node: &mut Node, storage: &BTreeSet<String>) {
    if node.kind.is_two_way() && node.operations.is_empty() {
        if let Some(cond) = &node.expression {
            node.operations = lower_condition(cond);
        }
    }
    if !node.storage_read.is_empty() || !node.storage_written.is_empty() {
        return;
    }
    let source = node
        .expression
        .as_ref()
        .or_else(|| node.declaration.as_ref().and_then(|d| d.value.as_ref()));
    if let Some(e) = source {
        let (read, written) = storage_effects(e, storage);
        node.storage_read = read;
        node.storage_written = written;
    }
}

/// Pick the functions to analyse. `None` selects everything.
pub fn select<'a>(
    contracts: &'a [ContractIr],
    contract: Option<&str>,
    function: Option<&str>,
) -> Result<Vec<(&'a ContractIr, &'a FunctionIr)>, IrError> {
    let chosen: Vec<&ContractIr> = match contract {
        Some(name) => {
            let c = contracts
                .iter()
                .find(|c| c.name == name)
                .ok_or_else(|| IrError::ContractNotFound(name.to_string()))?;
            vec![c]
        }
        None => contracts.iter().collect(),
    };

    let mut out = Vec::new();
    for c in chosen {
        match function {
            Some(name) => match c.function(name) {
                Some(f) => out.push((c, f)),
                // a named contract must have it; otherwise keep looking
                None if contract.is_some() => {
                    return Err(IrError::FunctionNotFound {
                        contract: c.name.clone(),
                        function: name.to_string(),
                    })
                }
                None => {}
            },
            None => out.extend(c.functions.iter().map(|f| (c, f))),
        }
    }
    if out.is_empty() {
        if let Some(name) = function {
            return Err(IrError::FunctionNotFound {
                contract: contract.unwrap_or("*").to_string(),
                function: name.to_string(),
            });
        }
    }
    Ok(out)
}
