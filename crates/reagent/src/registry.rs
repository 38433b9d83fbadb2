use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::models::tool::ToolDefinition;
use crate::plugins::Plugin;

/// Category whose tools are always offered to the model
pub const CORE_CATEGORY: &str = "core";

/// A registered tool together with its owner
#[derive(Clone)]
pub struct ToolRegistryEntry {
    pub definition: ToolDefinition,
    pub plugin_id: String,
    pub category: String,
    pub plugin: Arc<dyn Plugin>,
}

impl ToolRegistryEntry {
    pub fn is_core(&self) -> bool {
        self.category == CORE_CATEGORY
    }
}

impl fmt::Debug for ToolRegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistryEntry")
            .field("name", &self.definition.name)
            .field("plugin_id", &self.plugin_id)
            .field("category", &self.category)
            .finish()
    }
}

/// Catalog of callable tools, keyed by tool name.
///
/// Registration is last-writer-wins: registering a name that already exists
/// replaces the previous owner, which lets user plugins override built-ins.
/// The registry is shared between conversations, so all access goes through
/// an internal lock.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<BTreeMap<String, ToolRegistryEntry>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, ToolRegistryEntry>> {
        self.tools.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, ToolRegistryEntry>> {
        self.tools.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register every tool in `tools` as owned by `plugin_id` under `category`
    pub fn register_plugin(
        &self,
        plugin_id: &str,
        category: &str,
        tools: Vec<ToolDefinition>,
        plugin: Arc<dyn Plugin>,
    ) {
        let mut registry = self.write();
        for definition in tools {
            if let Some(previous) = registry.get(&definition.name) {
                if previous.plugin_id != plugin_id {
                    tracing::debug!(
                        tool = %definition.name,
                        previous = %previous.plugin_id,
                        plugin = plugin_id,
                        "tool overridden by another plugin"
                    );
                }
            }
            registry.insert(
                definition.name.clone(),
                ToolRegistryEntry {
                    definition,
                    plugin_id: plugin_id.to_string(),
                    category: category.to_string(),
                    plugin: plugin.clone(),
                },
            );
        }
    }

    /// Remove every tool currently owned by `plugin_id`
    pub fn unregister_plugin(&self, plugin_id: &str) {
        self.write().retain(|_, entry| entry.plugin_id != plugin_id);
    }

    pub fn get_tool(&self, name: &str) -> Option<ToolRegistryEntry> {
        self.read().get(name).cloned()
    }

    /// Definitions visible to the model, sorted by name.
    ///
    /// Without `active_categories` every tool is returned. With it, only core
    /// tools plus tools whose category has been activated.
    pub fn get_tool_definitions(
        &self,
        active_categories: Option<&BTreeSet<String>>,
    ) -> Vec<ToolDefinition> {
        self.read()
            .values()
            .filter(|entry| match active_categories {
                None => true,
                Some(active) => entry.is_core() || active.contains(&entry.category),
            })
            .map(|entry| entry.definition.clone())
            .collect()
    }

    /// Distinct non-core categories currently registered
    pub fn get_on_demand_categories(&self) -> BTreeSet<String> {
        self.read()
            .values()
            .filter(|entry| !entry.is_core())
            .map(|entry| entry.category.clone())
            .collect()
    }

    /// Independent copy holding only the entries matching `predicate`
    pub fn copy_filtered<F>(&self, predicate: F) -> ToolRegistry
    where
        F: Fn(&ToolRegistryEntry) -> bool,
    {
        let filtered = self
            .read()
            .iter()
            .filter(|(_, entry)| predicate(entry))
            .map(|(name, entry)| (name.clone(), entry.clone()))
            .collect();
        ToolRegistry {
            tools: RwLock::new(filtered),
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
