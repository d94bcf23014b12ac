//! Binding enumeration: one organization template, one deployable template
//! per (account, region) target.
//!
//! Each resource is placed in the cross product of its account targets and
//! its region targets. Explicit targeting replaces the template default; it is
//! never merged with it. Placements are grouped by target in first-seen order.
//! Account references in targeting are resolved here, eagerly; references in
//! parameters and properties wait for the per-target template.

use super::error::{OrgError, Result};
use super::resolver::AccountResolver;
use super::state::PersistedState;
use super::template::CfnTemplate;
use super::types::*;
use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use tracing::{debug, info};

/// One concrete deployment target with its lazily resolved template.
#[derive(Debug)]
pub struct CfnBinding<'a> {
    pub stack_name: String,
    pub account_id: String,
    pub region: String,
    pub template: CfnTemplate<'a>,
    state: &'a PersistedState,
}

impl CfnBinding<'_> {
    /// Compare the rendered template with the hash recorded at the last
    /// deployment of this target. Forces resolution.
    pub fn action(&self) -> Result<BindingAction> {
        let hash = self.template.template_hash()?;
        let action = match self
            .state
            .get_target(&self.stack_name, &self.account_id, &self.region)
        {
            Some(target) if target.last_committed_hash == hash => BindingAction::None,
            _ => BindingAction::UpdateOrCreate,
        };
        Ok(action)
    }

    /// The record to persist once this target has been deployed.
    pub fn to_stack_target(&self) -> Result<StackTarget> {
        Ok(StackTarget {
            stack_name: self.stack_name.clone(),
            account_id: self.account_id.clone(),
            region: self.region.clone(),
            last_committed_hash: self.template.template_hash()?,
        })
    }
}

/// Splits one organization template into per-target templates.
#[derive(Debug)]
pub struct CloudFormationBinder<'a> {
    stack_name: String,
    template: &'a TemplateRoot,
    state: &'a PersistedState,
}

impl<'a> CloudFormationBinder<'a> {
    pub fn new(stack_name: &str, template: &'a TemplateRoot, state: &'a PersistedState) -> Self {
        Self {
            stack_name: stack_name.to_string(),
            template,
            state,
        }
    }

    pub fn stack_name(&self) -> &str {
        &self.stack_name
    }

    /// Compute every (account, region) target that owns at least one resource.
    pub fn enum_bindings(&self) -> Result<Vec<CfnBinding<'a>>> {
        let template: &'a TemplateRoot = self.template;
        let resolver = AccountResolver::new(&template.organization, self.state);

        // Targets resolved from the template defaults, computed at most once.
        let mut default_accounts: Option<Vec<String>> = None;

        let mut targets: IndexMap<(String, String), Vec<&'a Resource>> = IndexMap::new();
        for resource in template.resources.values() {
            let accounts = match &resource.account_targeting {
                Targeting::Explicit(selector) => resolver.expand_selector(selector)?,
                Targeting::Default => match &default_accounts {
                    Some(accounts) => accounts.clone(),
                    None => {
                        let selector = template.default_account_targeting.as_ref().ok_or_else(|| {
                            OrgError::Configuration(format!(
                                "resource '{}' uses default account targeting but the template declares no default accounts",
                                resource.logical_id
                            ))
                        })?;
                        let expanded = resolver.expand_selector(selector)?;
                        default_accounts = Some(expanded.clone());
                        expanded
                    }
                },
            };
            if accounts.is_empty() {
                return Err(OrgError::Configuration(format!(
                    "resource '{}' targets no accounts",
                    resource.logical_id
                )));
            }

            let regions = self.region_targets(resource)?;

            debug!(
                resource = %resource.logical_id,
                accounts = ?accounts,
                regions = ?regions,
                "placing resource"
            );
            for account in &accounts {
                for region in &regions {
                    targets
                        .entry((account.clone(), region.clone()))
                        .or_default()
                        .push(resource);
                }
            }
        }

        info!(
            stack = %self.stack_name,
            resources = template.resources.len(),
            bindings = targets.len(),
            "enumerated bindings"
        );

        Ok(targets
            .into_iter()
            .map(|((account_id, region), resources)| CfnBinding {
                stack_name: self.stack_name.clone(),
                template: CfnTemplate::new(
                    template,
                    resolver,
                    account_id.clone(),
                    region.clone(),
                    resources,
                ),
                account_id,
                region,
                state: self.state,
            })
            .collect())
    }

    /// Targets recorded for this stack that the template no longer produces.
    pub fn enum_removed_targets(&self, bindings: &[CfnBinding<'_>]) -> Vec<StackTarget> {
        let current: FxHashSet<(&str, &str)> = bindings
            .iter()
            .map(|b| (b.account_id.as_str(), b.region.as_str()))
            .collect();
        self.state
            .enum_targets(&self.stack_name)
            .into_iter()
            .filter(|t| !current.contains(&(t.account_id.as_str(), t.region.as_str())))
            .cloned()
            .collect()
    }

    fn region_targets(&self, resource: &Resource) -> Result<Vec<String>> {
        let regions = resource
            .region_targeting
            .effective(self.template.default_region_targeting.as_ref())
            .ok_or_else(|| {
                OrgError::Configuration(format!(
                    "resource '{}' uses default region targeting but the template declares no default regions",
                    resource.logical_id
                ))
            })?;
        if regions.is_empty() {
            return Err(OrgError::Configuration(format!(
                "resource '{}' targets no regions",
                resource.logical_id
            )));
        }
        let mut seen = FxHashSet::default();
        Ok(regions
            .iter()
            .filter(|r| seen.insert(r.as_str()))
            .cloned()
            .collect())
    }
}
