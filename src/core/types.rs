//! Organization, template, and persisted-state model types.
//!
//! The organization and template types are built by the parser and are
//! read-only afterwards. State types derive Serialize/Deserialize for the
//! YAML state file.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Resource type tags
// ============================================================================

/// Organization entity types, as written in the template `Type` field and
/// used as the type half of a persisted binding key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrgResourceType {
    #[serde(rename = "OC::ORG::MasterAccount")]
    MasterAccount,
    #[serde(rename = "OC::ORG::Account")]
    Account,
    #[serde(rename = "OC::ORG::OrganizationalUnit")]
    OrganizationalUnit,
}

impl OrgResourceType {
    /// Parse the template spelling of a type tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "OC::ORG::MasterAccount" => Some(Self::MasterAccount),
            "OC::ORG::Account" => Some(Self::Account),
            "OC::ORG::OrganizationalUnit" => Some(Self::OrganizationalUnit),
            _ => None,
        }
    }
}

impl fmt::Display for OrgResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MasterAccount => write!(f, "OC::ORG::MasterAccount"),
            Self::Account => write!(f, "OC::ORG::Account"),
            Self::OrganizationalUnit => write!(f, "OC::ORG::OrganizationalUnit"),
        }
    }
}

// ============================================================================
// Organization model
// ============================================================================

/// An account in the organization.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    /// Logical id, unique within the organization
    pub logical_id: String,

    /// Physical account id as declared in the template, if known
    pub account_id: Option<String>,

    /// Display name
    pub account_name: String,

    /// Root user email
    pub root_email: Option<String>,

    /// Account tags (order-preserving)
    pub tags: IndexMap<String, String>,

    /// Whether this is the organization's master (management) account
    pub is_master_account: bool,
}

/// A grouping of accounts.
#[derive(Debug, Clone, PartialEq)]
pub struct OrganizationalUnit {
    pub logical_id: String,
    pub name: String,
    /// Logical ids of member accounts
    pub accounts: Vec<String>,
}

/// The parsed `Organization` section.
#[derive(Debug, Clone)]
pub struct OrganizationSection {
    pub master_account: Account,

    /// Member accounts keyed by logical id (master excluded)
    pub accounts: IndexMap<String, Account>,

    pub organizational_units: IndexMap<String, OrganizationalUnit>,
}

impl OrganizationSection {
    /// Find any account, master included, by logical id.
    pub fn find_account(&self, logical_id: &str) -> Option<&Account> {
        if self.master_account.logical_id == logical_id {
            return Some(&self.master_account);
        }
        self.accounts.get(logical_id)
    }

    /// All accounts, master first.
    pub fn all_accounts(&self) -> impl Iterator<Item = &Account> {
        std::iter::once(&self.master_account).chain(self.accounts.values())
    }

    /// Whether a logical id names any organization entity.
    pub fn contains(&self, logical_id: &str) -> bool {
        self.find_account(logical_id).is_some()
            || self.organizational_units.contains_key(logical_id)
    }
}

// ============================================================================
// Targeting
// ============================================================================

/// Account or region targeting: either the template default or an explicit
/// value. An explicit empty list stays `Explicit` and never means "default".
#[derive(Debug, Clone, PartialEq)]
pub enum Targeting<T> {
    Default,
    Explicit(T),
}

impl<T> Targeting<T> {
    /// Pick the explicit value, falling back to the template default.
    pub fn effective<'a>(&'a self, default: Option<&'a T>) -> Option<&'a T> {
        match self {
            Self::Default => default,
            Self::Explicit(value) => Some(value),
        }
    }

    pub fn is_default(&self) -> bool {
        matches!(self, Self::Default)
    }
}

/// One entry of an `Accounts` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountRef {
    /// `'*'`, every member account
    All,
    /// A logical account id or a physical account id
    Account(String),
}

/// Explicit account targeting as declared in an `OrganizationBinding`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountSelector {
    pub accounts: Vec<AccountRef>,
    pub organizational_units: Vec<String>,
    pub accounts_with_tag: Option<String>,
    pub include_master_account: bool,
    pub exclude_accounts: Vec<String>,
}

// ============================================================================
// Template model
// ============================================================================

/// A template resource.
#[derive(Debug, Clone)]
pub struct Resource {
    pub logical_id: String,

    /// Provider resource type, e.g. `AWS::SNS::Topic`
    pub resource_type: String,

    /// `Properties`, unresolved
    pub properties: Option<serde_yaml_ng::Value>,

    pub account_targeting: Targeting<AccountSelector>,
    pub region_targeting: Targeting<Vec<String>>,

    pub depends_on: Vec<String>,

    /// Remaining resource attributes (`Condition`, `DeletionPolicy`, ...)
    pub attributes: IndexMap<String, serde_yaml_ng::Value>,
}

/// A template parameter declaration. Field names keep their template spelling
/// (`Type`, `Default`, `ExportAccountId`, ...).
#[derive(Debug, Clone)]
pub struct Parameter {
    pub logical_id: String,
    pub fields: IndexMap<String, serde_yaml_ng::Value>,
}

/// A parsed organization template.
#[derive(Debug, Clone)]
pub struct TemplateRoot {
    pub format_version: String,
    pub description: Option<String>,
    pub organization: OrganizationSection,
    pub default_account_targeting: Option<AccountSelector>,
    pub default_region_targeting: Option<Vec<String>>,
    pub parameters: IndexMap<String, Parameter>,
    /// `Mappings`, copied into every target
    pub mappings: IndexMap<String, serde_yaml_ng::Value>,
    /// `Conditions`, copied into every target
    pub conditions: IndexMap<String, serde_yaml_ng::Value>,
    /// Resources in declaration order
    pub resources: IndexMap<String, Resource>,
    /// `Outputs`, kept in targets that hold every resource they reference
    pub outputs: IndexMap<String, serde_yaml_ng::Value>,
}

// ============================================================================
// Persisted state records
// ============================================================================

/// A recorded logical → physical id mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedBinding {
    #[serde(rename = "type")]
    pub binding_type: OrgResourceType,
    pub physical_id: String,
    pub logical_id: String,
    pub last_committed_hash: String,
}

/// A deployed (stack, account, region) target and the hash it was deployed with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackTarget {
    pub stack_name: String,
    pub account_id: String,
    pub region: String,
    pub last_committed_hash: String,
}

/// What a deployment engine should do with a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingAction {
    UpdateOrCreate,
    None,
    Delete,
}

impl fmt::Display for BindingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpdateOrCreate => write!(f, "UPDATE-OR-CREATE"),
            Self::None => write!(f, "NO-OP"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

// ============================================================================
// Scalar helper
// ============================================================================

/// Render a YAML scalar as a string. Unquoted account ids parse as numbers,
/// so they go through here too.
pub fn yaml_scalar_to_string(val: &serde_yaml_ng::Value) -> Option<String> {
    match val {
        serde_yaml_ng::Value::String(s) => Some(s.clone()),
        serde_yaml_ng::Value::Number(n) => Some(n.to_string()),
        serde_yaml_ng::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
