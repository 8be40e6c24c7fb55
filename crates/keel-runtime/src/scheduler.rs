use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::call::ToolCall;

/// Parsed call with dependency info
#[derive(Debug, Clone)]
pub struct PlannedCall {
    pub index: usize,
    pub call: ToolCall,
    pub depends_on: Vec<String>,
}

/// Parse a plan document: `{"calls": [{"id", "tool", "input", "depends_on"}]}`.
/// Missing ids default to `call_<index>`.
pub fn parse_plan(plan: &Value) -> Result<Vec<PlannedCall>> {
    let calls = plan["calls"]
        .as_array()
        .context("Plan missing 'calls' array")?;

    let mut result = Vec::with_capacity(calls.len());
    let mut seen = HashSet::new();

    for (i, entry) in calls.iter().enumerate() {
        let id = entry["id"]
            .as_str()
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("call_{}", i));
        if !seen.insert(id.clone()) {
            anyhow::bail!("Duplicate call id '{}'", id);
        }

        let tool = entry["tool"]
            .as_str()
            .context(format!("Call {} missing 'tool' field", i))?
            .to_string();

        let input = entry["input"].clone();

        let depends_on = entry["depends_on"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        result.push(PlannedCall {
            index: i,
            call: ToolCall::new(id, tool, input),
            depends_on,
        });
    }

    Ok(result)
}

/// Group calls into levels via topological sort (Kahn's algorithm).
/// Each inner Vec holds indices that may run in parallel; levels run in order.
pub fn compute_levels(calls: &[PlannedCall]) -> Result<Vec<Vec<usize>>> {
    let id_to_idx: HashMap<&str, usize> = calls
        .iter()
        .enumerate()
        .map(|(i, c)| (c.call.id.as_str(), i))
        .collect();

    for planned in calls {
        for dep in &planned.depends_on {
            if !id_to_idx.contains_key(dep.as_str()) {
                anyhow::bail!(
                    "Call '{}' depends on '{}' which does not exist",
                    planned.call.id,
                    dep
                );
            }
        }
    }

    let n = calls.len();
    let mut in_degree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

    for (i, planned) in calls.iter().enumerate() {
        for dep in &planned.depends_on {
            let dep_idx = id_to_idx[dep.as_str()];
            dependents[dep_idx].push(i);
            in_degree[i] += 1;
        }
    }

    let mut queue: VecDeque<usize> = VecDeque::new();
    for (i, deg) in in_degree.iter().enumerate() {
        if *deg == 0 {
            queue.push_back(i);
        }
    }

    let mut levels: Vec<Vec<usize>> = Vec::new();
    let mut processed = 0;

    while !queue.is_empty() {
        let mut level: Vec<usize> = queue.drain(..).collect();
        level.sort_unstable();
        processed += level.len();

        let mut next_queue = VecDeque::new();
        for &idx in &level {
            for &dep_idx in &dependents[idx] {
                in_degree[dep_idx] -= 1;
                if in_degree[dep_idx] == 0 {
                    next_queue.push_back(dep_idx);
                }
            }
        }

        levels.push(level);
        queue = next_queue;
    }

    if processed != n {
        anyhow::bail!("Cycle detected in call dependencies");
    }

    Ok(levels)
}

/// Stages ready for `Dispatcher::execute_stages`
pub fn into_stages(calls: Vec<PlannedCall>) -> Result<Vec<Vec<ToolCall>>> {
    let levels = compute_levels(&calls)?;
    let mut slots: Vec<Option<ToolCall>> = calls.into_iter().map(|p| Some(p.call)).collect();
    Ok(levels
        .into_iter()
        .map(|level| level.into_iter().filter_map(|i| slots[i].take()).collect())
        .collect())
}

pub fn has_dependencies(calls: &[PlannedCall]) -> bool {
    calls.iter().any(|c| !c.depends_on.is_empty())
}
