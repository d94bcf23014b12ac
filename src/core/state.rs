//! Persisted state: logical → physical bindings and deployed stack targets.
//!
//! The binder only reads from the state. Callers seed it (`set_binding`)
//! before constructing a binder and record deployed targets afterwards.

use super::error::{OrgError, Result};
use super::types::{OrgResourceType, PersistedBinding, StackTarget};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Persisted state document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Physical id of the organization's master account
    master_account_id: String,

    /// Bindings grouped by type, keyed by logical id
    #[serde(default)]
    bindings: IndexMap<OrgResourceType, IndexMap<String, PersistedBinding>>,

    /// Deployed stack targets
    #[serde(default)]
    targets: Vec<StackTarget>,
}

impl PersistedState {
    /// A state seeded only with the organization root.
    pub fn create_empty(master_account_id: &str) -> Self {
        Self {
            master_account_id: master_account_id.to_string(),
            bindings: IndexMap::new(),
            targets: Vec::new(),
        }
    }

    pub fn master_account_id(&self) -> &str {
        &self.master_account_id
    }

    /// Look up the binding for `(binding_type, logical_id)`.
    pub fn get_binding(
        &self,
        binding_type: OrgResourceType,
        logical_id: &str,
    ) -> Option<&PersistedBinding> {
        self.bindings.get(&binding_type)?.get(logical_id)
    }

    /// Insert or replace a binding.
    pub fn set_binding(&mut self, binding: PersistedBinding) {
        debug!(
            binding_type = %binding.binding_type,
            logical_id = %binding.logical_id,
            physical_id = %binding.physical_id,
            "set binding"
        );
        self.bindings
            .entry(binding.binding_type)
            .or_default()
            .insert(binding.logical_id.clone(), binding);
    }

    /// Shorthand for binding an account.
    pub fn set_account_binding(&mut self, logical_id: &str, physical_id: &str, hash: &str) {
        self.set_binding(PersistedBinding {
            binding_type: OrgResourceType::Account,
            physical_id: physical_id.to_string(),
            logical_id: logical_id.to_string(),
            last_committed_hash: hash.to_string(),
        });
    }

    /// Remove a binding, returning it if present.
    pub fn remove_binding(
        &mut self,
        binding_type: OrgResourceType,
        logical_id: &str,
    ) -> Option<PersistedBinding> {
        self.bindings
            .get_mut(&binding_type)?
            .shift_remove(logical_id)
    }

    /// All bindings of one type, in insertion order.
    pub fn enum_bindings(&self, binding_type: OrgResourceType) -> Vec<&PersistedBinding> {
        self.bindings
            .get(&binding_type)
            .map(|m| m.values().collect())
            .unwrap_or_default()
    }

    /// Every binding, grouped by type.
    pub fn all_bindings(&self) -> impl Iterator<Item = &PersistedBinding> {
        self.bindings.values().flat_map(|m| m.values())
    }

    /// Look up a deployed target.
    pub fn get_target(&self, stack_name: &str, account_id: &str, region: &str) -> Option<&StackTarget> {
        self.targets.iter().find(|t| {
            t.stack_name == stack_name && t.account_id == account_id && t.region == region
        })
    }

    /// Record a deployed target, replacing any previous record for the same key.
    pub fn set_target(&mut self, target: StackTarget) {
        match self.targets.iter_mut().find(|t| {
            t.stack_name == target.stack_name
                && t.account_id == target.account_id
                && t.region == target.region
        }) {
            Some(existing) => *existing = target,
            None => self.targets.push(target),
        }
    }

    /// Forget a deployed target.
    pub fn remove_target(&mut self, stack_name: &str, account_id: &str, region: &str) -> Option<StackTarget> {
        let index = self.targets.iter().position(|t| {
            t.stack_name == stack_name && t.account_id == account_id && t.region == region
        })?;
        Some(self.targets.remove(index))
    }

    /// All deployed targets of one stack.
    pub fn enum_targets(&self, stack_name: &str) -> Vec<&StackTarget> {
        self.targets
            .iter()
            .filter(|t| t.stack_name == stack_name)
            .collect()
    }

    pub fn all_targets(&self) -> &[StackTarget] {
        &self.targets
    }
}

/// Load a state file. Returns None if the file doesn't exist.
pub fn load_state(path: &Path) -> Result<Option<PersistedState>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path).map_err(|e| OrgError::io(path, e))?;
    let state: PersistedState = serde_yaml_ng::from_str(&content)
        .map_err(|e| OrgError::State(format!("invalid state file {}: {}", path.display(), e)))?;
    debug!(path = %path.display(), "loaded state");
    Ok(Some(state))
}

/// Save a state file atomically (write to temp, then rename).
pub fn save_state(path: &Path, state: &PersistedState) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| OrgError::io(parent, e))?;
    }

    let yaml = serde_yaml_ng::to_string(state)
        .map_err(|e| OrgError::State(format!("serialize error: {}", e)))?;

    let tmp_path = path.with_extension("yaml.tmp");
    std::fs::write(&tmp_path, &yaml).map_err(|e| OrgError::io(&tmp_path, e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| OrgError::io(path, e))?;

    info!(path = %path.display(), "saved state");
    Ok(())
}
