//! Layered hook configuration: raw specs, merge, and compilation.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::events::HookEvent;
use super::matcher::ToolMatcher;
use crate::config::HookDefaults;

/// One hook entry as written in a configuration source
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HookSpec {
    /// Stable id for `remove`; generated from event and position if absent
    #[serde(default)]
    pub id: Option<String>,

    /// Exact name, `*` wildcard, or regex over the tool name
    #[serde(default)]
    pub matcher: Option<String>,

    /// Command template, tokenized like a shell word list but never run through a shell
    pub command: String,

    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Treat spawn failures and timeouts as a block instead of a warning
    #[serde(default)]
    pub block_on_error: bool,
}

/// Merged hook configuration (event -> ordered hook list)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HookConfig {
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,

    #[serde(default)]
    pub events: BTreeMap<HookEvent, Vec<HookSpec>>,
}

/// A hook ready to run: matcher resolved, command tokenized
#[derive(Debug, Clone)]
pub struct HookDefinition {
    pub id: String,
    pub event: HookEvent,
    pub matcher: ToolMatcher,
    /// Original template, for display and logging
    pub command: String,
    pub argv: Vec<String>,
    pub timeout: Duration,
    pub block_on_error: bool,
}

impl HookDefinition {
    pub fn new(event: HookEvent, spec: HookSpec, default_timeout: Duration) -> Result<Self> {
        let mut matcher = ToolMatcher::parse(spec.matcher.as_deref())?;
        if !event.is_tool_scoped() && !matcher.is_any() {
            warn!(event = %event, matcher = %matcher, "Matcher ignored for non-tool event");
            matcher = ToolMatcher::Any;
        }

        let argv = shlex::split(&spec.command)
            .context(format!("unbalanced quoting in hook command: {}", spec.command))?;
        if argv.is_empty() {
            bail!("empty hook command for event {}", event);
        }

        Ok(Self {
            id: spec.id.unwrap_or_default(),
            event,
            matcher,
            command: spec.command,
            argv,
            timeout: spec
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(default_timeout),
            block_on_error: spec.block_on_error,
        })
    }

    pub fn applies_to(&self, tool_name: Option<&str>) -> bool {
        match tool_name {
            Some(name) if self.event.is_tool_scoped() => self.matcher.matches(name),
            _ => true,
        }
    }
}

impl HookConfig {
    /// Merge configuration layers, lowest priority first.
    ///
    /// Hook lists are concatenated per event; other fields deep-merge with
    /// later layers winning on scalar conflicts.
    pub fn merge_layers(layers: &[Value]) -> Result<Self> {
        let mut merged = Value::Object(Default::default());
        for layer in layers {
            deep_merge(&mut merged, layer.clone());
        }
        serde_json::from_value(merged).context("Invalid merged hook configuration")
    }

    /// Resolve matchers and templates. Fails on the first invalid entry.
    pub fn compile(&self, defaults: &HookDefaults) -> Result<Vec<HookDefinition>> {
        let default_timeout = self
            .default_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| defaults.default_timeout());

        let mut definitions = Vec::new();
        for (event, specs) in &self.events {
            for (i, spec) in specs.iter().enumerate() {
                let mut def = HookDefinition::new(*event, spec.clone(), default_timeout)
                    .context(format!("hook #{} for event {}", i, event))?;
                if def.id.is_empty() {
                    def.id = format!("{}#{}", event, i);
                }
                definitions.push(def);
            }
        }
        Ok(definitions)
    }

    pub fn hook_count(&self) -> usize {
        self.events.values().map(Vec::len).sum()
    }
}

/// Arrays concatenate, objects merge recursively, anything else is replaced.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(base_items), Value::Array(overlay_items)) => {
            base_items.extend(overlay_items);
        }
        (base, overlay) => *base = overlay,
    }
}
