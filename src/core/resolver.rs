//! Logical-reference resolution.
//!
//! Turns logical account references into physical account ids using the
//! persisted state as the source of truth, expands account selectors, and
//! resolves `Ref`/`GetAtt` references to accounts inside template values.
//! Nothing here mutates the state, so resolution can run speculatively.

use super::error::{OrgError, Result};
use super::parser::reference_name;
use super::state::PersistedState;
use super::types::*;
use regex::Regex;
use rustc_hash::FxHashSet;
use serde_yaml_ng::{Mapping, Value};
use std::sync::LazyLock;
use tracing::debug;

static ACCOUNT_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{12}$").expect("account id pattern is valid"));

/// Whether a string already is a physical account id.
pub fn is_physical_account_id(s: &str) -> bool {
    ACCOUNT_ID_RE.is_match(s)
}

/// Read-only view over the organization and the persisted state.
#[derive(Debug, Clone, Copy)]
pub struct AccountResolver<'a> {
    org: &'a OrganizationSection,
    state: &'a PersistedState,
}

impl<'a> AccountResolver<'a> {
    pub fn new(org: &'a OrganizationSection, state: &'a PersistedState) -> Self {
        Self { org, state }
    }

    /// Resolve a logical or physical account reference to a physical id.
    pub fn resolve_account(&self, reference: &str) -> Result<String> {
        if is_physical_account_id(reference) {
            return Ok(reference.to_string());
        }
        let account = self
            .org
            .find_account(reference)
            .ok_or_else(|| OrgError::unknown_account(reference))?;

        if let Some(binding) = self.state.get_binding(OrgResourceType::Account, reference) {
            debug!(logical_id = reference, physical_id = %binding.physical_id, "resolved account");
            return Ok(binding.physical_id.clone());
        }
        if account.is_master_account {
            if let Some(binding) = self
                .state
                .get_binding(OrgResourceType::MasterAccount, reference)
            {
                return Ok(binding.physical_id.clone());
            }
            debug!(logical_id = reference, "resolved master account from state root");
            return Ok(self.state.master_account_id().to_string());
        }
        Err(OrgError::unknown_account(reference))
    }

    /// Expand a selector to an ordered, de-duplicated list of physical ids.
    pub fn expand_selector(&self, selector: &AccountSelector) -> Result<Vec<String>> {
        let mut candidates: Vec<&str> = Vec::new();

        for entry in &selector.accounts {
            match entry {
                AccountRef::All => {
                    candidates.extend(self.org.accounts.keys().map(String::as_str))
                }
                AccountRef::Account(name) => candidates.push(name),
            }
        }
        for ou_id in &selector.organizational_units {
            let ou = self.org.organizational_units.get(ou_id).ok_or_else(|| {
                OrgError::Configuration(format!("unknown organizational unit '{}'", ou_id))
            })?;
            candidates.extend(ou.accounts.iter().map(String::as_str));
        }
        if let Some(filter) = &selector.accounts_with_tag {
            let (key, value) = match filter.split_once('=') {
                Some((k, v)) => (k, Some(v)),
                None => (filter.as_str(), None),
            };
            candidates.extend(
                self.org
                    .accounts
                    .values()
                    .filter(|a| match (a.tags.get(key), value) {
                        (Some(actual), Some(wanted)) => actual == wanted,
                        (Some(_), None) => true,
                        (None, _) => false,
                    })
                    .map(|a| a.logical_id.as_str()),
            );
        }
        if selector.include_master_account {
            candidates.push(&self.org.master_account.logical_id);
        }

        let excluded: FxHashSet<&str> =
            selector.exclude_accounts.iter().map(String::as_str).collect();
        let mut seen = FxHashSet::default();
        let mut physical = Vec::new();
        for candidate in candidates {
            if excluded.contains(candidate) {
                continue;
            }
            let id = self.resolve_account(candidate)?;
            if excluded.contains(id.as_str()) {
                continue;
            }
            if seen.insert(id.clone()) {
                physical.push(id);
            }
        }
        Ok(physical)
    }

    /// Resolve account references inside a value. References to anything other
    /// than an organization account are left in place.
    pub fn resolve_value(&self, value: &Value) -> Result<Value> {
        if let Some(target) = ref_target(value) {
            if self.org.find_account(&target).is_some() {
                return Ok(Value::String(self.resolve_account(&target)?));
            }
            return Ok(value.clone());
        }
        if let Some((target, attribute)) = get_att_target(value) {
            if let Some(account) = self.org.find_account(&target) {
                return self.account_attribute(account, &attribute);
            }
            return Ok(value.clone());
        }

        match value {
            Value::Sequence(seq) => Ok(Value::Sequence(
                seq.iter()
                    .map(|v| self.resolve_value(v))
                    .collect::<Result<_>>()?,
            )),
            Value::Mapping(m) => {
                let mut out = Mapping::with_capacity(m.len());
                for (k, v) in m {
                    out.insert(k.clone(), self.resolve_value(v)?);
                }
                Ok(Value::Mapping(out))
            }
            Value::Tagged(tagged) => {
                let mut tagged = tagged.clone();
                tagged.value = self.resolve_value(&tagged.value)?;
                Ok(Value::Tagged(tagged))
            }
            scalar => Ok(scalar.clone()),
        }
    }

    /// Resolve a value that must denote an account, such as a parameter's
    /// `ExportAccountId`. A reference to a non-account is an unknown account.
    pub fn resolve_account_value(&self, value: &Value) -> Result<String> {
        if let Some((target, attribute)) = get_att_target(value) {
            if attribute != "AccountId" {
                return Err(OrgError::Configuration(format!(
                    "expected an account id, got attribute '{}' of '{}'",
                    attribute, target
                )));
            }
            return self.resolve_account(&target);
        }
        match reference_name(value) {
            Some(name) => self.resolve_account(&name),
            None => Err(OrgError::Configuration(format!(
                "expected an account reference, got {:?}",
                value
            ))),
        }
    }

    fn account_attribute(&self, account: &Account, attribute: &str) -> Result<Value> {
        match attribute {
            "AccountId" => Ok(Value::String(self.resolve_account(&account.logical_id)?)),
            "AccountName" => Ok(Value::String(account.account_name.clone())),
            "RootEmail" => account
                .root_email
                .clone()
                .map(Value::String)
                .ok_or_else(|| {
                    OrgError::Configuration(format!(
                        "account '{}' has no RootEmail",
                        account.logical_id
                    ))
                }),
            other => match other.strip_prefix("Tags.") {
                Some(tag) => account
                    .tags
                    .get(tag)
                    .map(|v| Value::String(v.clone()))
                    .ok_or_else(|| {
                        OrgError::Configuration(format!(
                            "account '{}' has no tag '{}'",
                            account.logical_id, tag
                        ))
                    }),
                None => Err(OrgError::Configuration(format!(
                    "account '{}' has no attribute '{}'",
                    account.logical_id, other
                ))),
            },
        }
    }
}

/// Target of `!Ref X` or `{Ref: X}`. Bare scalars are not references here.
fn ref_target(value: &Value) -> Option<String> {
    match value {
        Value::Tagged(tagged) if tagged.tag == "Ref" => yaml_scalar_to_string(&tagged.value),
        Value::Mapping(m) if m.len() == 1 => m.get("Ref").and_then(yaml_scalar_to_string),
        _ => None,
    }
}

/// Target and attribute of `!GetAtt X.Attr`, `!GetAtt [X, Attr]` or
/// `{Fn::GetAtt: [X, Attr]}`.
fn get_att_target(value: &Value) -> Option<(String, String)> {
    let inner = match value {
        Value::Tagged(tagged) if tagged.tag == "GetAtt" => &tagged.value,
        Value::Mapping(m) if m.len() == 1 => m.get("Fn::GetAtt")?,
        _ => return None,
    };
    match inner {
        Value::String(s) => s
            .split_once('.')
            .map(|(target, attr)| (target.to_string(), attr.to_string())),
        Value::Sequence(seq) if seq.len() == 2 => Some((
            yaml_scalar_to_string(&seq[0])?,
            yaml_scalar_to_string(&seq[1])?,
        )),
        _ => None,
    }
}
