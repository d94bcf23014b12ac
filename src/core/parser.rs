//! Template parsing and validation.
//!
//! Parses an organization template document and validates structural
//! constraints:
//! - Exactly one master account, with a physical account id
//! - Logical ids unique across organization, parameters and resources
//! - Targeting references name organization entities or physical ids
//! - Region names are well formed
//! - DependsOn references exist
//! - `Condition` attributes name a declared condition
//!
//! Unknown top-level sections are rejected while parsing.
//!
//! References inside parameter values and resource properties are not checked
//! here. They are resolved per target, on demand.

use super::error::{OrgError, Result};
use super::resolver::is_physical_account_id;
use super::types::*;
use indexmap::IndexMap;
use regex::Regex;
use serde_yaml_ng::{Mapping, Value};
use std::path::Path;
use std::sync::LazyLock;

static REGION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z]{2}(-gov|-iso[a-z]*)?-[a-z]+-\d+$").expect("region pattern is valid")
});

const FORMAT_VERSION_PREFIX: &str = "2010-09-09";

/// Top-level sections of an organization template.
const ROOT_SECTIONS: [&str; 10] = [
    "AWSTemplateFormatVersion",
    "Description",
    "Organization",
    "DefaultOrganizationBinding",
    "DefaultOrganizationBindingRegion",
    "Parameters",
    "Mappings",
    "Conditions",
    "Resources",
    "Outputs",
];

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a template file from disk.
pub fn parse_template_file(path: &Path) -> Result<TemplateRoot> {
    let content = std::fs::read_to_string(path).map_err(|e| OrgError::io(path, e))?;
    parse_template(&content)
}

/// Parse a template from a string.
pub fn parse_template(yaml: &str) -> Result<TemplateRoot> {
    let doc: Value =
        serde_yaml_ng::from_str(yaml).map_err(|e| OrgError::Parse(format!("YAML: {}", e)))?;
    let root = doc
        .as_mapping()
        .ok_or_else(|| OrgError::Parse("template root must be a mapping".to_string()))?;

    for key in root.keys() {
        let key = key_string(key, "template")?;
        if !ROOT_SECTIONS.contains(&key.as_str()) {
            return Err(OrgError::Parse(format!(
                "unknown top-level section '{}'",
                key
            )));
        }
    }

    let format_version = match root.get("AWSTemplateFormatVersion") {
        Some(v) => yaml_scalar_to_string(v).ok_or_else(|| {
            OrgError::Parse("AWSTemplateFormatVersion must be a string".to_string())
        })?,
        None => FORMAT_VERSION_PREFIX.to_string(),
    };
    let description = root.get("Description").and_then(yaml_scalar_to_string);

    let organization = parse_organization(root.get("Organization"))?;

    let (default_account_targeting, mut default_region_targeting) =
        match root.get("DefaultOrganizationBinding") {
            Some(v) => {
                let m = as_mapping(v, "DefaultOrganizationBinding")?;
                let accounts = match parse_account_targeting(m, "DefaultOrganizationBinding")? {
                    Targeting::Explicit(selector) => Some(selector),
                    Targeting::Default => None,
                };
                let regions = match m.get("Regions") {
                    Some(r) => Some(parse_regions(r, "DefaultOrganizationBinding")?),
                    None => None,
                };
                (accounts, regions)
            }
            None => (None, None),
        };

    if let Some(v) = root.get("DefaultOrganizationBindingRegion") {
        if default_region_targeting.is_some() {
            return Err(OrgError::Parse(
                "default regions specified in both DefaultOrganizationBinding and DefaultOrganizationBindingRegion".to_string(),
            ));
        }
        default_region_targeting = Some(parse_regions(v, "DefaultOrganizationBindingRegion")?);
    }

    let mut parameters = IndexMap::new();
    if let Some(v) = root.get("Parameters") {
        for (key, decl) in as_mapping(v, "Parameters")? {
            let logical_id = key_string(key, "Parameters")?;
            let mut fields = IndexMap::new();
            for (field, value) in as_mapping(decl, &logical_id)? {
                fields.insert(key_string(field, &logical_id)?, value.clone());
            }
            parameters.insert(logical_id.clone(), Parameter { logical_id, fields });
        }
    }

    let mut resources = IndexMap::new();
    if let Some(v) = root.get("Resources") {
        for (key, decl) in as_mapping(v, "Resources")? {
            let logical_id = key_string(key, "Resources")?;
            let resource = parse_resource(&logical_id, decl)?;
            resources.insert(logical_id, resource);
        }
    }

    Ok(TemplateRoot {
        format_version,
        description,
        organization,
        default_account_targeting,
        default_region_targeting,
        parameters,
        mappings: parse_section(root, "Mappings")?,
        conditions: parse_section(root, "Conditions")?,
        resources,
        outputs: parse_section(root, "Outputs")?,
    })
}

/// Parse and validate in one step, folding validation errors into one error.
pub fn parse_and_validate(yaml: &str) -> Result<TemplateRoot> {
    let template = parse_template(yaml)?;
    let errors = validate_template(&template);
    if errors.is_empty() {
        Ok(template)
    } else {
        Err(OrgError::Validation(
            errors.into_iter().map(|e| e.message).collect(),
        ))
    }
}

/// Validate a parsed template. Returns a list of errors (empty = valid).
pub fn validate_template(template: &TemplateRoot) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let org = &template.organization;

    if !template.format_version.starts_with(FORMAT_VERSION_PREFIX) {
        errors.push(error(format!(
            "AWSTemplateFormatVersion must start with \"{}\", got \"{}\"",
            FORMAT_VERSION_PREFIX, template.format_version
        )));
    }

    // Master and member account ids
    match &org.master_account.account_id {
        None => errors.push(error(format!(
            "master account '{}' has no AccountId",
            org.master_account.logical_id
        ))),
        Some(id) if !is_physical_account_id(id) => errors.push(error(format!(
            "master account '{}' has malformed AccountId '{}'",
            org.master_account.logical_id, id
        ))),
        Some(_) => {}
    }
    for account in org.accounts.values() {
        if let Some(id) = &account.account_id {
            if !is_physical_account_id(id) {
                errors.push(error(format!(
                    "account '{}' has malformed AccountId '{}'",
                    account.logical_id, id
                )));
            }
        }
    }

    // OU membership
    for ou in org.organizational_units.values() {
        for member in &ou.accounts {
            if org.find_account(member).is_none() {
                errors.push(error(format!(
                    "organizational unit '{}' references unknown account '{}'",
                    ou.logical_id, member
                )));
            }
        }
    }

    // Logical id collisions across sections
    for id in template.parameters.keys() {
        if org.contains(id) {
            errors.push(error(format!(
                "parameter '{}' collides with an organization logical id",
                id
            )));
        }
    }
    for id in template.resources.keys() {
        if org.contains(id) || template.parameters.contains_key(id) {
            errors.push(error(format!(
                "resource '{}' collides with another logical id",
                id
            )));
        }
    }

    // Default targeting
    if let Some(selector) = &template.default_account_targeting {
        validate_selector(org, selector, "DefaultOrganizationBinding", &mut errors);
    }
    if let Some(regions) = &template.default_region_targeting {
        validate_regions(regions, "DefaultOrganizationBinding", &mut errors);
    }

    // Each resource
    for (id, resource) in &template.resources {
        let context = format!("resource '{}'", id);
        if let Targeting::Explicit(selector) = &resource.account_targeting {
            validate_selector(org, selector, &context, &mut errors);
        }
        if resource.account_targeting.is_default() && template.default_account_targeting.is_none() {
            errors.push(error(format!(
                "{} has no account targeting and the template has no default",
                context
            )));
        }
        if let Targeting::Explicit(regions) = &resource.region_targeting {
            validate_regions(regions, &context, &mut errors);
        }
        if resource.region_targeting.is_default() && template.default_region_targeting.is_none() {
            errors.push(error(format!(
                "{} has no region targeting and the template has no default",
                context
            )));
        }

        for dep in &resource.depends_on {
            if dep == id {
                errors.push(error(format!("resource '{}' depends on itself", id)));
            } else if !template.resources.contains_key(dep) {
                errors.push(error(format!(
                    "resource '{}' depends on unknown resource '{}'",
                    id, dep
                )));
            }
        }

        validate_condition(template, resource.attributes.get("Condition"), &context, &mut errors);
    }

    for (id, output) in &template.outputs {
        let context = format!("output '{}'", id);
        if !output.is_mapping() {
            errors.push(error(format!("{} must be a mapping", context)));
            continue;
        }
        if output.get("Value").is_none() {
            errors.push(error(format!("{} has no Value", context)));
        }
        validate_condition(template, output.get("Condition"), &context, &mut errors);
    }

    errors
}

fn validate_condition(
    template: &TemplateRoot,
    condition: Option<&Value>,
    context: &str,
    errors: &mut Vec<ValidationError>,
) {
    let Some(condition) = condition else {
        return;
    };
    match yaml_scalar_to_string(condition) {
        Some(name) if template.conditions.contains_key(&name) => {}
        Some(name) => errors.push(error(format!(
            "{} references unknown condition '{}'",
            context, name
        ))),
        None => errors.push(error(format!("{} has a non-scalar Condition", context))),
    }
}

fn error(message: String) -> ValidationError {
    ValidationError { message }
}

fn validate_selector(
    org: &OrganizationSection,
    selector: &AccountSelector,
    context: &str,
    errors: &mut Vec<ValidationError>,
) {
    let named = selector
        .accounts
        .iter()
        .filter_map(|a| match a {
            AccountRef::Account(name) => Some(name),
            AccountRef::All => None,
        })
        .chain(selector.exclude_accounts.iter());
    for name in named {
        if !is_physical_account_id(name) && org.find_account(name).is_none() {
            errors.push(error(format!(
                "{} targets unknown account '{}'",
                context, name
            )));
        }
    }
    for ou in &selector.organizational_units {
        if !org.organizational_units.contains_key(ou) {
            errors.push(error(format!(
                "{} targets unknown organizational unit '{}'",
                context, ou
            )));
        }
    }
}

fn validate_regions(regions: &[String], context: &str, errors: &mut Vec<ValidationError>) {
    for region in regions {
        if !REGION_RE.is_match(region) {
            errors.push(error(format!(
                "{} has malformed region '{}'",
                context, region
            )));
        }
    }
}

// ============================================================================
// Section parsers
// ============================================================================

/// A pass-through section: logical id → declaration, kept unresolved.
fn parse_section(root: &Mapping, name: &str) -> Result<IndexMap<String, Value>> {
    let mut section = IndexMap::new();
    if let Some(v) = root.get(name) {
        for (key, decl) in as_mapping(v, name)? {
            section.insert(key_string(key, name)?, decl.clone());
        }
    }
    Ok(section)
}

fn parse_organization(section: Option<&Value>) -> Result<OrganizationSection> {
    let section = section
        .ok_or_else(|| OrgError::Parse("template has no Organization section".to_string()))?;

    let mut master_account = None;
    let mut accounts = IndexMap::new();
    let mut organizational_units = IndexMap::new();

    for (key, entry) in as_mapping(section, "Organization")? {
        let logical_id = key_string(key, "Organization")?;
        let entry = as_mapping(entry, &logical_id)?;
        let tag = entry
            .get("Type")
            .and_then(Value::as_str)
            .ok_or_else(|| OrgError::Parse(format!("'{}' has no Type", logical_id)))?;
        let props = match entry.get("Properties") {
            Some(p) => as_mapping(p, &logical_id)?.clone(),
            None => Mapping::new(),
        };

        match OrgResourceType::from_tag(tag) {
            Some(OrgResourceType::MasterAccount) => {
                if master_account.is_some() {
                    return Err(OrgError::Parse(format!(
                        "'{}' is a second master account",
                        logical_id
                    )));
                }
                master_account = Some(parse_account(&logical_id, &props, true)?);
            }
            Some(OrgResourceType::Account) => {
                let account = parse_account(&logical_id, &props, false)?;
                accounts.insert(logical_id, account);
            }
            Some(OrgResourceType::OrganizationalUnit) => {
                let name = props
                    .get("OrganizationalUnitName")
                    .and_then(yaml_scalar_to_string)
                    .unwrap_or_else(|| logical_id.clone());
                let members = match props.get("Accounts") {
                    Some(v) => parse_logical_refs(v, &logical_id)?,
                    None => Vec::new(),
                };
                organizational_units.insert(
                    logical_id.clone(),
                    OrganizationalUnit {
                        logical_id,
                        name,
                        accounts: members,
                    },
                );
            }
            None => {
                return Err(OrgError::Parse(format!(
                    "'{}' has unsupported organization type '{}'",
                    logical_id, tag
                )))
            }
        }
    }

    let master_account = master_account
        .ok_or_else(|| OrgError::Parse("organization has no master account".to_string()))?;

    Ok(OrganizationSection {
        master_account,
        accounts,
        organizational_units,
    })
}

fn parse_account(logical_id: &str, props: &Mapping, is_master_account: bool) -> Result<Account> {
    let mut tags = IndexMap::new();
    if let Some(v) = props.get("Tags") {
        for (k, val) in as_mapping(v, logical_id)? {
            let value = yaml_scalar_to_string(val).ok_or_else(|| {
                OrgError::Parse(format!("'{}' has a non-scalar tag value", logical_id))
            })?;
            tags.insert(key_string(k, logical_id)?, value);
        }
    }

    Ok(Account {
        logical_id: logical_id.to_string(),
        account_id: props.get("AccountId").and_then(yaml_scalar_to_string),
        account_name: props
            .get("AccountName")
            .and_then(yaml_scalar_to_string)
            .unwrap_or_else(|| logical_id.to_string()),
        root_email: props.get("RootEmail").and_then(yaml_scalar_to_string),
        tags,
        is_master_account,
    })
}

fn parse_resource(logical_id: &str, decl: &Value) -> Result<Resource> {
    let decl = as_mapping(decl, logical_id)?;
    let resource_type = decl
        .get("Type")
        .and_then(Value::as_str)
        .ok_or_else(|| OrgError::Parse(format!("resource '{}' has no Type", logical_id)))?
        .to_string();

    let (account_targeting, region_targeting) = match decl.get("OrganizationBinding") {
        Some(v) => {
            let m = as_mapping(v, logical_id)?;
            let regions = match m.get("Regions") {
                Some(r) => Targeting::Explicit(parse_regions(r, logical_id)?),
                None => Targeting::Default,
            };
            (parse_account_targeting(m, logical_id)?, regions)
        }
        None => (Targeting::Default, Targeting::Default),
    };

    let depends_on = match decl.get("DependsOn") {
        Some(v) => string_list(v, logical_id)?,
        None => Vec::new(),
    };

    let mut attributes = IndexMap::new();
    for (key, value) in decl {
        let key = key_string(key, logical_id)?;
        if matches!(
            key.as_str(),
            "Type" | "OrganizationBinding" | "Properties" | "DependsOn"
        ) {
            continue;
        }
        attributes.insert(key, value.clone());
    }

    Ok(Resource {
        logical_id: logical_id.to_string(),
        resource_type,
        properties: decl.get("Properties").cloned(),
        account_targeting,
        region_targeting,
        depends_on,
        attributes,
    })
}

/// Account targeting is explicit as soon as any account key is present.
fn parse_account_targeting(binding: &Mapping, context: &str) -> Result<Targeting<AccountSelector>> {
    const ACCOUNT_KEYS: [&str; 5] = [
        "Accounts",
        "OrganizationalUnits",
        "AccountsWithTag",
        "IncludeMasterAccount",
        "ExcludeAccounts",
    ];
    if !ACCOUNT_KEYS.iter().any(|k| binding.contains_key(*k)) {
        return Ok(Targeting::Default);
    }

    let accounts = match binding.get("Accounts") {
        Some(v) => parse_account_refs(v, context)?,
        None => Vec::new(),
    };
    let organizational_units = match binding.get("OrganizationalUnits") {
        Some(v) => parse_logical_refs(v, context)?,
        None => Vec::new(),
    };
    let exclude_accounts = match binding.get("ExcludeAccounts") {
        Some(v) => parse_logical_refs(v, context)?,
        None => Vec::new(),
    };
    let accounts_with_tag = match binding.get("AccountsWithTag") {
        Some(v) => Some(yaml_scalar_to_string(v).ok_or_else(|| {
            OrgError::Parse(format!("{}: AccountsWithTag must be a string", context))
        })?),
        None => None,
    };
    let include_master_account = match binding.get("IncludeMasterAccount") {
        Some(v) => v.as_bool().ok_or_else(|| {
            OrgError::Parse(format!("{}: IncludeMasterAccount must be a boolean", context))
        })?,
        None => false,
    };

    Ok(Targeting::Explicit(AccountSelector {
        accounts,
        organizational_units,
        accounts_with_tag,
        include_master_account,
        exclude_accounts,
    }))
}

fn parse_account_refs(v: &Value, context: &str) -> Result<Vec<AccountRef>> {
    items(v)
        .map(|item| {
            if item.as_str() == Some("*") {
                return Ok(AccountRef::All);
            }
            reference_name(item).map(AccountRef::Account).ok_or_else(|| {
                OrgError::Parse(format!("{}: invalid account reference {:?}", context, item))
            })
        })
        .collect()
}

fn parse_logical_refs(v: &Value, context: &str) -> Result<Vec<String>> {
    items(v)
        .map(|item| {
            reference_name(item).ok_or_else(|| {
                OrgError::Parse(format!("{}: invalid reference {:?}", context, item))
            })
        })
        .collect()
}

fn parse_regions(v: &Value, context: &str) -> Result<Vec<String>> {
    string_list(v, context)
}

/// The target of `!Ref X`, `{Ref: X}`, or a bare scalar.
pub(crate) fn reference_name(v: &Value) -> Option<String> {
    match v {
        Value::Tagged(tagged) if tagged.tag == "Ref" => yaml_scalar_to_string(&tagged.value),
        Value::Mapping(m) if m.len() == 1 => m.get("Ref").and_then(yaml_scalar_to_string),
        other => yaml_scalar_to_string(other),
    }
}

fn items(v: &Value) -> Box<dyn Iterator<Item = &Value> + '_> {
    match v {
        Value::Sequence(seq) => Box::new(seq.iter()),
        single => Box::new(std::iter::once(single)),
    }
}

fn string_list(v: &Value, context: &str) -> Result<Vec<String>> {
    items(v)
        .map(|item| {
            yaml_scalar_to_string(item)
                .ok_or_else(|| OrgError::Parse(format!("{}: expected string, got {:?}", context, item)))
        })
        .collect()
}

fn as_mapping<'a>(v: &'a Value, context: &str) -> Result<&'a Mapping> {
    v.as_mapping()
        .ok_or_else(|| OrgError::Parse(format!("{}: expected a mapping", context)))
}

fn key_string(key: &Value, context: &str) -> Result<String> {
    yaml_scalar_to_string(key)
        .ok_or_else(|| OrgError::Parse(format!("{}: mapping keys must be strings", context)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORG: &str = r#"
AWSTemplateFormatVersion: '2010-09-09-OC'
Organization:
  MasterAccount:
    Type: OC::ORG::MasterAccount
    Properties:
      AccountName: Master
      AccountId: '000000000000'
  Account1:
    Type: OC::ORG::Account
    Properties:
      AccountName: Account 1
      RootEmail: account1@example.com
      Tags:
        env: prod
        budget: 100
  Account2:
    Type: OC::ORG::Account
    Properties:
      AccountName: Account 2
      AccountId: 222222222222
  Workloads:
    Type: OC::ORG::OrganizationalUnit
    Properties:
      OrganizationalUnitName: workloads
      Accounts:
        - !Ref Account1
        - Ref: Account2
"#;

    fn with_body(body: &str) -> String {
        format!("{}{}", ORG, body)
    }

    fn messages(template: &TemplateRoot) -> Vec<String> {
        validate_template(template)
            .into_iter()
            .map(|e| e.message)
            .collect()
    }

    #[test]
    fn test_parse_organization() {
        let t = parse_template(ORG).unwrap();
        let org = &t.organization;
        assert_eq!(org.master_account.logical_id, "MasterAccount");
        assert_eq!(org.master_account.account_id.as_deref(), Some("000000000000"));
        assert!(org.master_account.is_master_account);
        assert_eq!(org.accounts.len(), 2);
        assert_eq!(org.accounts["Account1"].account_id, None);
        assert_eq!(org.accounts["Account1"].tags["budget"], "100");
        assert_eq!(org.accounts["Account2"].account_id.as_deref(), Some("222222222222"));
        assert_eq!(
            org.organizational_units["Workloads"].accounts,
            vec!["Account1", "Account2"]
        );
    }

    #[test]
    fn test_parse_targeting_forms() {
        let yaml = with_body(
            r#"
DefaultOrganizationBinding:
  Accounts: '*'
  Regions: eu-west-1
Resources:
  Defaulted:
    Type: AWS::SNS::Topic
  RegionOnly:
    Type: AWS::SNS::Topic
    OrganizationBinding:
      Regions: [us-east-1, us-west-2]
  Explicit:
    Type: AWS::S3::Bucket
    OrganizationBinding:
      Accounts: !Ref Account2
      IncludeMasterAccount: true
      ExcludeAccounts: [!Ref Account1]
"#,
        );
        let t = parse_template(&yaml).unwrap();
        assert_eq!(
            t.default_account_targeting.as_ref().unwrap().accounts,
            vec![AccountRef::All]
        );
        assert_eq!(
            t.default_region_targeting,
            Some(vec!["eu-west-1".to_string()])
        );

        let defaulted = &t.resources["Defaulted"];
        assert!(defaulted.account_targeting.is_default());
        assert!(defaulted.region_targeting.is_default());

        let region_only = &t.resources["RegionOnly"];
        assert!(region_only.account_targeting.is_default());
        assert_eq!(
            region_only.region_targeting,
            Targeting::Explicit(vec!["us-east-1".to_string(), "us-west-2".to_string()])
        );

        match &t.resources["Explicit"].account_targeting {
            Targeting::Explicit(sel) => {
                assert_eq!(sel.accounts, vec![AccountRef::Account("Account2".into())]);
                assert!(sel.include_master_account);
                assert_eq!(sel.exclude_accounts, vec!["Account1"]);
            }
            Targeting::Default => panic!("expected explicit targeting"),
        }
        assert!(messages(&t).is_empty(), "{:?}", messages(&t));
    }

    #[test]
    fn test_parse_explicit_empty_accounts_stays_explicit() {
        let yaml = with_body(
            r#"
Resources:
  Empty:
    Type: AWS::SNS::Topic
    OrganizationBinding:
      Accounts: []
      Regions: eu-west-1
"#,
        );
        let t = parse_template(&yaml).unwrap();
        assert_eq!(
            t.resources["Empty"].account_targeting,
            Targeting::Explicit(AccountSelector::default())
        );
    }

    #[test]
    fn test_parse_default_region_shorthand() {
        let yaml = with_body(
            r#"
DefaultOrganizationBindingRegion: [eu-west-1, eu-central-1]
Resources: {}
"#,
        );
        let t = parse_template(&yaml).unwrap();
        assert_eq!(
            t.default_region_targeting,
            Some(vec!["eu-west-1".to_string(), "eu-central-1".to_string()])
        );
    }

    #[test]
    fn test_parse_default_regions_twice() {
        let yaml = with_body(
            r#"
DefaultOrganizationBinding:
  Regions: eu-west-1
DefaultOrganizationBindingRegion: eu-central-1
"#,
        );
        assert!(matches!(parse_template(&yaml), Err(OrgError::Parse(_))));
    }

    #[test]
    fn test_parse_resource_attributes() {
        let yaml = with_body(
            r#"
DefaultOrganizationBinding:
  Accounts: !Ref Account1
  Regions: eu-west-1
Resources:
  Bucket:
    Type: AWS::S3::Bucket
    DeletionPolicy: Retain
    DependsOn: Topic
    Properties:
      BucketName: !Sub '${AWS::AccountId}-logs'
  Topic:
    Type: AWS::SNS::Topic
"#,
        );
        let t = parse_template(&yaml).unwrap();
        let bucket = &t.resources["Bucket"];
        assert_eq!(bucket.resource_type, "AWS::S3::Bucket");
        assert_eq!(bucket.depends_on, vec!["Topic"]);
        assert!(bucket.attributes.contains_key("DeletionPolicy"));
        assert!(!bucket.attributes.contains_key("Type"));
        assert!(bucket.properties.is_some());
        let keys: Vec<_> = t.resources.keys().collect();
        assert_eq!(keys, vec!["Bucket", "Topic"]);
    }

    #[test]
    fn test_parse_parameters_keep_fields() {
        let yaml = with_body(
            r#"
Parameters:
  Param:
    Type: String
    ExportAccountId: !Ref Account1
    ExportName: shared-topic
"#,
        );
        let t = parse_template(&yaml).unwrap();
        let p = &t.parameters["Param"];
        let keys: Vec<_> = p.fields.keys().collect();
        assert_eq!(keys, vec!["Type", "ExportAccountId", "ExportName"]);
    }

    #[test]
    fn test_missing_master_account() {
        let yaml = r#"
Organization:
  Account1:
    Type: OC::ORG::Account
    Properties:
      AccountName: one
"#;
        let err = parse_template(yaml).unwrap_err();
        assert!(err.to_string().contains("no master account"));
    }

    #[test]
    fn test_unsupported_org_type() {
        let yaml = r#"
Organization:
  Thing:
    Type: OC::ORG::Nope
"#;
        assert!(parse_template(yaml)
            .unwrap_err()
            .to_string()
            .contains("unsupported organization type"));
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let result = parse_template("not: [valid: yaml: {{");
        assert!(matches!(result, Err(OrgError::Parse(_))));
    }

    #[test]
    fn test_validate_unknown_targeting_account() {
        let yaml = with_body(
            r#"
Resources:
  Topic:
    Type: AWS::SNS::Topic
    OrganizationBinding:
      Accounts: [!Ref Account9, '123456789012']
      Regions: eu-west-1
"#,
        );
        let t = parse_template(&yaml).unwrap();
        let msgs = messages(&t);
        assert_eq!(msgs.len(), 1, "{:?}", msgs);
        assert!(msgs[0].contains("unknown account 'Account9'"));
    }

    #[test]
    fn test_validate_missing_defaults() {
        let yaml = with_body(
            r#"
Resources:
  Topic:
    Type: AWS::SNS::Topic
"#,
        );
        let t = parse_template(&yaml).unwrap();
        let msgs = messages(&t);
        assert!(msgs.iter().any(|m| m.contains("no account targeting")));
        assert!(msgs.iter().any(|m| m.contains("no region targeting")));
    }

    #[test]
    fn test_validate_bad_region_and_dependency() {
        let yaml = with_body(
            r#"
Resources:
  Topic:
    Type: AWS::SNS::Topic
    DependsOn: [Ghost, Topic]
    OrganizationBinding:
      Accounts: !Ref Account1
      Regions: Europe
"#,
        );
        let t = parse_template(&yaml).unwrap();
        let msgs = messages(&t);
        assert!(msgs.iter().any(|m| m.contains("malformed region 'Europe'")));
        assert!(msgs.iter().any(|m| m.contains("unknown resource 'Ghost'")));
        assert!(msgs.iter().any(|m| m.contains("depends on itself")));
    }

    #[test]
    fn test_validate_collisions_and_master_id() {
        let yaml = r#"
AWSTemplateFormatVersion: '2010-09-09-OC'
Organization:
  MasterAccount:
    Type: OC::ORG::MasterAccount
    Properties:
      AccountId: 'abc'
Parameters:
  MasterAccount:
    Type: String
"#;
        let t = parse_template(yaml).unwrap();
        let msgs = messages(&t);
        assert!(msgs.iter().any(|m| m.contains("malformed AccountId")));
        assert!(msgs.iter().any(|m| m.contains("collides")));
    }

    #[test]
    fn test_parameter_refs_not_validated() {
        let yaml = with_body(
            r#"
Parameters:
  Param:
    ExportAccountId: !Ref Account9
"#,
        );
        let t = parse_and_validate(&yaml).unwrap();
        assert!(t.parameters.contains_key("Param"));
    }

    #[test]
    fn test_parse_and_validate_folds_errors() {
        let yaml = with_body(
            r#"
Resources:
  Topic:
    Type: AWS::SNS::Topic
"#,
        );
        match parse_and_validate(&yaml) {
            Err(OrgError::Validation(msgs)) => assert_eq!(msgs.len(), 2),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_root_section_rejected() {
        let yaml = with_body(
            r#"
Resource:
  Topic:
    Type: AWS::SNS::Topic
"#,
        );
        match parse_template(&yaml) {
            Err(OrgError::Parse(msg)) => assert!(msg.contains("'Resource'"), "{}", msg),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_pass_through_sections() {
        let yaml = with_body(
            r#"
DefaultOrganizationBinding:
  Accounts: !Ref Account1
  Regions: eu-west-1
Mappings:
  Sizes:
    prod: {Instance: m5.large}
Conditions:
  IsProd: !Equals [!Ref Env, prod]
Resources:
  Topic:
    Type: AWS::SNS::Topic
    Condition: IsProd
Outputs:
  TopicArn:
    Condition: IsProd
    Value: !Ref Topic
"#,
        );
        let t = parse_template(&yaml).unwrap();
        assert!(t.mappings.contains_key("Sizes"));
        assert!(t.conditions.contains_key("IsProd"));
        assert!(t.outputs.contains_key("TopicArn"));
        assert!(!messages(&t).iter().any(|m| m.contains("condition")));
    }

    #[test]
    fn test_validate_conditions_and_outputs() {
        let yaml = with_body(
            r#"
DefaultOrganizationBinding:
  Accounts: !Ref Account1
  Regions: eu-west-1
Resources:
  Topic:
    Type: AWS::SNS::Topic
    Condition: IsProd
Outputs:
  TopicArn:
    Condition: IsDev
    Export:
      Name: topic-arn
  Broken: just-a-string
"#,
        );
        let t = parse_template(&yaml).unwrap();
        let msgs = messages(&t);
        assert!(msgs.iter().any(|m| m.contains("resource 'Topic' references unknown condition 'IsProd'")));
        assert!(msgs.iter().any(|m| m.contains("output 'TopicArn' references unknown condition 'IsDev'")));
        assert!(msgs.iter().any(|m| m.contains("output 'TopicArn' has no Value")));
        assert!(msgs.iter().any(|m| m.contains("output 'Broken' must be a mapping")));
    }

    #[test]
    fn test_parse_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("organization.yml");
        std::fs::write(&path, ORG).unwrap();
        let t = parse_template_file(&path).unwrap();
        assert_eq!(t.organization.accounts.len(), 2);
        assert!(matches!(
            parse_template_file(&dir.path().join("missing.yml")),
            Err(OrgError::Io { .. })
        ));
    }
}
