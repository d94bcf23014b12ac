//! Per-target template builder.
//!
//! A `CfnTemplate` captures the resources assigned to one (account, region)
//! target when bindings are enumerated. Parameter and property references are
//! resolved only when the parameters or the body are first requested; the
//! outcome, failure included, is memoized.

use super::error::{OrgError, Result};
use super::hasher;
use super::resolver::AccountResolver;
use super::types::{yaml_scalar_to_string, Resource, TemplateRoot};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{json, Value as Json};
use serde_yaml_ng::value::TaggedValue;
use serde_yaml_ng::Value;
use regex::Regex;
use std::sync::{LazyLock, OnceLock};
use tracing::debug;

/// Output format version of rendered templates.
pub const CFN_FORMAT_VERSION: &str = "2010-09-09";

static SUB_VARIABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z0-9:]+)(?:\.[A-Za-z0-9.]+)?\}").expect("sub pattern is valid")
});

/// Parameter field holding a cross-account id.
const EXPORT_ACCOUNT_ID: &str = "ExportAccountId";

/// A parameter declaration with every reference resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct BoundParameter {
    fields: IndexMap<String, Json>,
}

impl BoundParameter {
    pub fn get(&self, field: &str) -> Option<&Json> {
        self.fields.get(field)
    }

    /// The resolved `ExportAccountId`, if declared.
    pub fn export_account_id(&self) -> Option<&str> {
        self.get(EXPORT_ACCOUNT_ID).and_then(Json::as_str)
    }
}

#[derive(Serialize)]
struct TemplateBody<'b> {
    #[serde(rename = "AWSTemplateFormatVersion")]
    format_version: &'static str,
    #[serde(rename = "Description", skip_serializing_if = "Option::is_none")]
    description: Option<&'b str>,
    #[serde(rename = "Parameters", skip_serializing_if = "no_parameters")]
    parameters: &'b IndexMap<String, BoundParameter>,
    #[serde(rename = "Mappings", skip_serializing_if = "IndexMap::is_empty")]
    mappings: IndexMap<&'b str, Json>,
    #[serde(rename = "Conditions", skip_serializing_if = "IndexMap::is_empty")]
    conditions: IndexMap<&'b str, Json>,
    #[serde(rename = "Resources")]
    resources: IndexMap<&'b str, IndexMap<&'b str, Json>>,
    #[serde(rename = "Outputs", skip_serializing_if = "IndexMap::is_empty")]
    outputs: IndexMap<&'b str, Json>,
}

fn no_parameters(p: &&IndexMap<String, BoundParameter>) -> bool {
    p.is_empty()
}

/// Deployable template for one (account, region) target.
#[derive(Debug)]
pub struct CfnTemplate<'a> {
    template: &'a TemplateRoot,
    resolver: AccountResolver<'a>,
    account_id: String,
    region: String,
    resources: Vec<&'a Resource>,
    parameters: OnceLock<Result<IndexMap<String, BoundParameter>>>,
    body: OnceLock<Result<String>>,
}

impl<'a> CfnTemplate<'a> {
    pub(crate) fn new(
        template: &'a TemplateRoot,
        resolver: AccountResolver<'a>,
        account_id: String,
        region: String,
        resources: Vec<&'a Resource>,
    ) -> Self {
        Self {
            template,
            resolver,
            account_id,
            region,
            resources,
            parameters: OnceLock::new(),
            body: OnceLock::new(),
        }
    }

    /// Logical ids of the captured resources. Does not resolve anything.
    pub fn resources(&self) -> Vec<&'a str> {
        self.resources.iter().map(|r| r.logical_id.as_str()).collect()
    }

    pub fn contains_resource(&self, logical_id: &str) -> bool {
        self.resources.iter().any(|r| r.logical_id == logical_id)
    }

    /// Resolve every parameter declaration of the template.
    pub fn enum_bound_parameters(&self) -> Result<&IndexMap<String, BoundParameter>> {
        self.parameters
            .get_or_init(|| self.bind_parameters())
            .as_ref()
            .map_err(Clone::clone)
    }

    /// Render the deployable template as pretty-printed JSON.
    pub fn create_template_body(&self) -> Result<&str> {
        self.body
            .get_or_init(|| self.render())
            .as_ref()
            .map(String::as_str)
            .map_err(Clone::clone)
    }

    /// BLAKE3 of the rendered body.
    pub fn template_hash(&self) -> Result<String> {
        Ok(hasher::hash_string(self.create_template_body()?))
    }

    fn bind_parameters(&self) -> Result<IndexMap<String, BoundParameter>> {
        debug!(account = %self.account_id, region = %self.region, "binding parameters");
        let mut bound = IndexMap::with_capacity(self.template.parameters.len());
        for (id, parameter) in &self.template.parameters {
            let mut fields = IndexMap::with_capacity(parameter.fields.len());
            for (field, value) in &parameter.fields {
                let resolved = if field == EXPORT_ACCOUNT_ID {
                    Json::String(self.resolver.resolve_account_value(value)?)
                } else {
                    to_json(&self.resolver.resolve_value(value)?)?
                };
                fields.insert(field.clone(), resolved);
            }
            bound.insert(id.clone(), BoundParameter { fields });
        }
        Ok(bound)
    }

    fn render(&self) -> Result<String> {
        let parameters = self.enum_bound_parameters()?;

        let mut resources = IndexMap::with_capacity(self.resources.len());
        for resource in self.resources.iter().copied() {
            resources.insert(resource.logical_id.as_str(), self.render_resource(resource)?);
        }

        let mut outputs = IndexMap::new();
        for (id, output) in &self.template.outputs {
            if self.holds_references(output) {
                outputs.insert(id.as_str(), to_json(&self.resolver.resolve_value(output)?)?);
            } else {
                debug!(
                    output = %id,
                    account = %self.account_id,
                    region = %self.region,
                    "output references another target, skipped"
                );
            }
        }

        let body = TemplateBody {
            format_version: CFN_FORMAT_VERSION,
            description: self.template.description.as_deref(),
            parameters,
            mappings: self.render_section(&self.template.mappings)?,
            conditions: self.render_section(&self.template.conditions)?,
            resources,
            outputs,
        };
        let text = serde_json::to_string_pretty(&body)
            .map_err(|e| OrgError::Serialization(e.to_string()))?;
        debug!(account = %self.account_id, region = %self.region, bytes = text.len(), "rendered template");
        Ok(text)
    }

    fn render_section(
        &self,
        section: &'a IndexMap<String, Value>,
    ) -> Result<IndexMap<&'a str, Json>> {
        section
            .iter()
            .map(|(id, decl)| -> Result<(&'a str, Json)> {
                Ok((id.as_str(), to_json(&self.resolver.resolve_value(decl)?)?))
            })
            .collect()
    }

    /// Whether every template resource `value` references is placed in this target.
    fn holds_references(&self, value: &Value) -> bool {
        let mut names = Vec::new();
        collect_references(value, &mut names);
        names
            .iter()
            .filter(|name| self.template.resources.contains_key(name.as_str()))
            .all(|name| self.contains_resource(name))
    }

    fn render_resource(&self, resource: &'a Resource) -> Result<IndexMap<&'a str, Json>> {
        let mut out = IndexMap::new();
        out.insert("Type", Json::String(resource.resource_type.clone()));
        if let Some(properties) = &resource.properties {
            out.insert(
                "Properties",
                to_json(&self.resolver.resolve_value(properties)?)?,
            );
        }

        // Dependencies placed in other targets cannot be expressed in this template.
        let depends_on: Vec<Json> = resource
            .depends_on
            .iter()
            .filter(|dep| self.contains_resource(dep))
            .map(|dep| Json::String(dep.clone()))
            .collect();
        if !depends_on.is_empty() {
            out.insert("DependsOn", Json::Array(depends_on));
        }

        for (key, value) in &resource.attributes {
            out.insert(key.as_str(), to_json(&self.resolver.resolve_value(value)?)?);
        }
        Ok(out)
    }
}

/// Logical ids named by `Ref`, `GetAtt` and `Sub` anywhere inside `value`,
/// in short or long form.
fn collect_references(value: &Value, names: &mut Vec<String>) {
    match value {
        Value::Tagged(tagged) => {
            let tag = tagged.tag.to_string();
            collect_intrinsic(tag.trim_start_matches('!'), &tagged.value, names);
            collect_references(&tagged.value, names);
        }
        Value::Mapping(m) => {
            if m.len() == 1 {
                if let Some((Value::String(k), v)) = m.iter().next() {
                    collect_intrinsic(k.strip_prefix("Fn::").unwrap_or(k), v, names);
                }
            }
            m.values().for_each(|v| collect_references(v, names));
        }
        Value::Sequence(seq) => seq.iter().for_each(|v| collect_references(v, names)),
        _ => {}
    }
}

fn collect_intrinsic(name: &str, arg: &Value, names: &mut Vec<String>) {
    match (name, arg) {
        ("Ref", target) => names.extend(yaml_scalar_to_string(target)),
        ("GetAtt", Value::String(s)) => {
            names.extend(s.split('.').next().map(str::to_string))
        }
        ("GetAtt", Value::Sequence(seq)) => {
            names.extend(seq.first().and_then(yaml_scalar_to_string))
        }
        ("Sub", Value::String(s)) => names.extend(sub_references(s)),
        ("Sub", Value::Sequence(seq)) => {
            if let Some(Value::String(s)) = seq.first() {
                names.extend(sub_references(s));
            }
        }
        _ => {}
    }
}

/// Names interpolated by a `Sub` string: `${Name}` or `${Name.Attribute}`.
fn sub_references(s: &str) -> impl Iterator<Item = String> + '_ {
    SUB_VARIABLE_RE
        .captures_iter(s)
        .map(|c| c[1].to_string())
}

/// Convert a template value to JSON, expanding short-form intrinsics
/// (`!Ref`, `!GetAtt`, `!Sub`, ...) to their long form.
pub fn to_json(value: &Value) -> Result<Json> {
    Ok(match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Number(n) => number_to_json(n)?,
        Value::String(s) => Json::String(s.clone()),
        Value::Sequence(seq) => Json::Array(seq.iter().map(to_json).collect::<Result<_>>()?),
        Value::Mapping(m) => {
            let mut obj = serde_json::Map::with_capacity(m.len());
            for (k, v) in m {
                let key = yaml_scalar_to_string(k).ok_or_else(|| {
                    OrgError::Serialization(format!("mapping key {:?} is not a scalar", k))
                })?;
                obj.insert(key, to_json(v)?);
            }
            Json::Object(obj)
        }
        Value::Tagged(tagged) => intrinsic(tagged)?,
    })
}

fn number_to_json(n: &serde_yaml_ng::Number) -> Result<Json> {
    if let Some(i) = n.as_i64() {
        return Ok(Json::from(i));
    }
    if let Some(u) = n.as_u64() {
        return Ok(Json::from(u));
    }
    n.as_f64()
        .and_then(serde_json::Number::from_f64)
        .map(Json::Number)
        .ok_or_else(|| OrgError::Serialization(format!("number {} is not representable", n)))
}

fn intrinsic(tagged: &TaggedValue) -> Result<Json> {
    let tag = tagged.tag.to_string();
    let name = tag.trim_start_matches('!');
    let inner = to_json(&tagged.value)?;
    let (key, value) = match name {
        "Ref" | "Condition" => (name.to_string(), inner),
        "GetAtt" => match inner {
            Json::String(s) => {
                let (target, attribute) = s.split_once('.').ok_or_else(|| {
                    OrgError::Serialization(format!("!GetAtt '{}' has no attribute", s))
                })?;
                ("Fn::GetAtt".to_string(), json!([target, attribute]))
            }
            other => ("Fn::GetAtt".to_string(), other),
        },
        other => (format!("Fn::{}", other), inner),
    };
    Ok(Json::Object(serde_json::Map::from_iter([(key, value)])))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Value {
        serde_yaml_ng::from_str(s).unwrap()
    }

    #[test]
    fn test_to_json_intrinsics() {
        let v = yaml(
            r#"
a: !Ref Bucket
b: !GetAtt Bucket.Arn
c: !Sub '${AWS::Region}-logs'
d: !Join ['-', [a, b]]
e: !GetAtt [Bucket, Arn]
"#,
        );
        let j = to_json(&v).unwrap();
        assert_eq!(j["a"], json!({"Ref": "Bucket"}));
        assert_eq!(j["b"], json!({"Fn::GetAtt": ["Bucket", "Arn"]}));
        assert_eq!(j["c"], json!({"Fn::Sub": "${AWS::Region}-logs"}));
        assert_eq!(j["d"], json!({"Fn::Join": ["-", ["a", "b"]]}));
        assert_eq!(j["e"], json!({"Fn::GetAtt": ["Bucket", "Arn"]}));
    }

    #[test]
    fn test_to_json_scalars_and_order() {
        let v = yaml("z: 1\na: 2.5\nm: true\nn: ~\n200: ok");
        let j = to_json(&v).unwrap();
        let keys: Vec<_> = j.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a", "m", "n", "200"]);
        assert_eq!(j["z"], json!(1));
        assert_eq!(j["a"], json!(2.5));
        assert_eq!(j["m"], json!(true));
        assert_eq!(j["n"], Json::Null);
    }

    #[test]
    fn test_to_json_rejects_composite_keys() {
        let v = yaml("? [a, b]\n: value");
        assert!(matches!(to_json(&v), Err(OrgError::Serialization(_))));
    }

    #[test]
    fn test_to_json_rejects_nan() {
        let v = yaml("x: .nan");
        assert!(matches!(to_json(&v), Err(OrgError::Serialization(_))));
    }

    #[test]
    fn test_to_json_getatt_without_attribute() {
        let v = yaml("x: !GetAtt Bucket");
        assert!(matches!(to_json(&v), Err(OrgError::Serialization(_))));
    }

    #[test]
    fn test_collect_references() {
        let v = yaml(
            r#"
Value: !GetAtt Topic.TopicArn
Export:
  Name: !Sub '${AWS::StackName}-${Queue.Arn}-${!Literal}'
Other: [{Ref: Bucket}, {"Fn::GetAtt": [Table, Arn]}, {"Fn::Sub": ["${Key}", {Key: !Ref Param}]}]
Plain: {Ref: Role, Extra: x}
"#,
        );
        let mut names = Vec::new();
        collect_references(&v, &mut names);
        assert_eq!(
            names,
            vec!["Topic", "AWS::StackName", "Queue", "Bucket", "Table", "Key", "Param"]
        );
    }

    #[test]
    fn test_bound_parameter_accessors() {
        let p = BoundParameter {
            fields: IndexMap::from([
                ("Type".to_string(), json!("String")),
                (EXPORT_ACCOUNT_ID.to_string(), json!("444444444444")),
            ]),
        };
        assert_eq!(p.export_account_id(), Some("444444444444"));
        assert_eq!(p.get("Type"), Some(&json!("String")));
        assert_eq!(
            serde_json::to_string(&p).unwrap(),
            r#"{"Type":"String","ExportAccountId":"444444444444"}"#
        );
    }
}
