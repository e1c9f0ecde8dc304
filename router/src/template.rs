//! Resolved application template: the `Function` and `Api` resources the gateway routes for.
//!
//! Templates arrive with every intrinsic already evaluated to a literal, so this module only maps
//! plain YAML/JSON onto structural types. A resource whose properties do not parse is skipped and
//! recorded in [`Template::skipped`]; the rest of the template stays usable.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::{error::TemplateError, location::ObjectLocation};

const FUNCTION_TYPE: &str = "AWS::Serverless::Function";
const API_TYPE: &str = "AWS::Serverless::Api";
const API_EVENT_TYPE: &str = "Api";

/// A serverless function resource.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    /// Logical id of the resource; this is the identity the gateway invokes.
    pub name: String,
    pub handler: Option<String>,
    pub runtime: Option<String>,
    pub timeout: Option<u64>,
    /// Event sources keyed by their logical name.
    pub events: BTreeMap<String, EventSource>,
}

/// One entry of a function's `Events` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventSource {
    /// An API Gateway event source; the only kind that produces routes.
    Api { path: String, method: String },
    /// Any other trigger (S3, Schedule, SQS, ...). Inert for routing.
    Other { kind: String },
}

/// A serverless api resource.
#[derive(Debug, Clone, PartialEq)]
pub struct Api {
    pub name: String,
    pub stage_name: Option<String>,
    /// MIME types treated as binary, already `~1`-decoded.
    pub binary_media_types: Vec<String>,
    pub definition: Option<DefinitionSource>,
}

/// Where an api's description document lives.
#[derive(Debug, Clone, PartialEq)]
pub enum DefinitionSource {
    LocalFile(PathBuf),
    ObjectStorage(ObjectLocation),
    InlineJson(String),
    /// A mapping embedded in a YAML template; scalar types were inferred by the YAML parser.
    InlineBody(serde_yaml::Value),
}

/// The routable subset of a resolved template.
#[derive(Debug, Default)]
pub struct Template {
    pub functions: BTreeMap<String, Function>,
    pub apis: BTreeMap<String, Api>,
    /// `Globals.Api.BinaryMediaTypes`, decoded. Applies to the implicit api that function `Api`
    /// events are served from.
    pub implicit_binary_media_types: Vec<String>,
    /// Resources that were recognised but could not be parsed.
    pub skipped: Vec<TemplateError>,
}

#[derive(Debug, Deserialize)]
struct RawTemplate {
    #[serde(rename = "Globals", default)]
    globals: RawGlobals,
    #[serde(rename = "Resources")]
    resources: Option<BTreeMap<String, RawResource>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawGlobals {
    #[serde(rename = "Api", default)]
    api: RawGlobalApi,
}

#[derive(Debug, Default, Deserialize)]
struct RawGlobalApi {
    #[serde(
        rename = "BinaryMediaTypes",
        default,
        deserialize_with = "crate::serde_ext::de_one_or_many_strings"
    )]
    binary_media_types: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawResource {
    #[serde(rename = "Type")]
    kind: String,
    #[serde(rename = "Properties", default)]
    properties: serde_yaml::Value,
}

#[derive(Debug, Default, Deserialize)]
struct RawFunctionProperties {
    #[serde(rename = "Handler", default)]
    handler: Option<String>,
    #[serde(rename = "Runtime", default)]
    runtime: Option<String>,
    #[serde(
        rename = "Timeout",
        default,
        deserialize_with = "crate::serde_ext::de_option_u64_or_string"
    )]
    timeout: Option<u64>,
    #[serde(rename = "Events", default)]
    events: BTreeMap<String, RawEvent>,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "Type")]
    kind: String,
    #[serde(rename = "Properties", default)]
    properties: serde_yaml::Value,
}

#[derive(Debug, Deserialize)]
struct RawApiEventProperties {
    #[serde(rename = "Path")]
    path: String,
    #[serde(rename = "Method")]
    method: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawApiProperties {
    #[serde(rename = "StageName", default)]
    stage_name: Option<String>,
    #[serde(
        rename = "BinaryMediaTypes",
        default,
        deserialize_with = "crate::serde_ext::de_one_or_many_strings"
    )]
    binary_media_types: Vec<String>,
    #[serde(rename = "DefinitionUri", default)]
    definition_uri: Option<RawDefinitionUri>,
    #[serde(rename = "DefinitionBody", default)]
    definition_body: Option<serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDefinitionUri {
    Path(String),
    Object {
        #[serde(rename = "Bucket")]
        bucket: String,
        #[serde(rename = "Key")]
        key: String,
        #[serde(rename = "Version", default)]
        version: Option<String>,
    },
}

impl Template {
    /// Parse a resolved template (YAML or JSON).
    ///
    /// Relative `DefinitionUri` paths are resolved against `base_dir`, normally the directory the
    /// template was read from.
    pub fn from_slice(bytes: &[u8], base_dir: &Path) -> Result<Self, TemplateError> {
        let raw: RawTemplate = serde_yaml::from_slice(bytes)?;
        let resources = raw.resources.ok_or(TemplateError::MissingResources)?;

        let global_binary_types = raw.globals.api.binary_media_types;
        let mut template = Template {
            implicit_binary_media_types: merge_media_types(&global_binary_types, &[]),
            ..Template::default()
        };

        for (name, resource) in resources {
            let err = match resource.kind.as_str() {
                FUNCTION_TYPE => match parse_function(&name, resource.properties) {
                    Ok(function) => {
                        template.functions.insert(name, function);
                        continue;
                    }
                    Err(err) => err,
                },
                API_TYPE => {
                    match parse_api(&name, resource.properties, &global_binary_types, base_dir) {
                        Ok(api) => {
                            template.apis.insert(name, api);
                            continue;
                        }
                        Err(err) => err,
                    }
                }
                _ => continue,
            };

            tracing::warn!(
                event = "resource_skipped",
                error = %err,
                "skipping template resource"
            );
            template.skipped.push(err);
        }

        Ok(template)
    }
}

fn invalid(resource: &str, reason: impl ToString) -> TemplateError {
    TemplateError::InvalidResource {
        resource: resource.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_function(name: &str, properties: serde_yaml::Value) -> Result<Function, TemplateError> {
    let props: RawFunctionProperties = if properties.is_null() {
        RawFunctionProperties::default()
    } else {
        serde_yaml::from_value(properties).map_err(|err| invalid(name, err))?
    };

    let mut events = BTreeMap::new();
    for (event_name, event) in props.events {
        let source = if event.kind == API_EVENT_TYPE {
            let api: RawApiEventProperties = serde_yaml::from_value(event.properties)
                .map_err(|err| invalid(name, format!("Events.{event_name}.Properties: {err}")))?;
            EventSource::Api {
                path: api.path,
                method: api.method,
            }
        } else {
            EventSource::Other { kind: event.kind }
        };
        events.insert(event_name, source);
    }

    Ok(Function {
        name: name.to_string(),
        handler: props.handler,
        runtime: props.runtime,
        timeout: props.timeout,
        events,
    })
}

fn parse_api(
    name: &str,
    properties: serde_yaml::Value,
    global_binary_types: &[String],
    base_dir: &Path,
) -> Result<Api, TemplateError> {
    let props: RawApiProperties = if properties.is_null() {
        RawApiProperties::default()
    } else {
        serde_yaml::from_value(properties).map_err(|err| invalid(name, err))?
    };

    let binary_media_types = merge_media_types(global_binary_types, &props.binary_media_types);

    let definition = match (props.definition_body, props.definition_uri) {
        (Some(serde_yaml::Value::String(json)), _) => Some(DefinitionSource::InlineJson(json)),
        (Some(body), _) => Some(DefinitionSource::InlineBody(body)),
        (None, Some(RawDefinitionUri::Object { bucket, key, version })) => {
            Some(DefinitionSource::ObjectStorage(ObjectLocation {
                bucket,
                key,
                version,
            }))
        }
        (None, Some(RawDefinitionUri::Path(uri))) => match ObjectLocation::parse_s3_uri(&uri) {
            Some(location) => Some(DefinitionSource::ObjectStorage(location)),
            None => Some(DefinitionSource::LocalFile(base_dir.join(uri))),
        },
        (None, None) => None,
    };

    Ok(Api {
        name: name.to_string(),
        stage_name: props.stage_name,
        binary_media_types,
        definition,
    })
}

fn merge_media_types(global: &[String], own: &[String]) -> Vec<String> {
    let mut merged = Vec::new();
    for media_type in global.iter().chain(own) {
        let decoded = decode_media_type(media_type);
        if !merged.contains(&decoded) {
            merged.push(decoded);
        }
    }
    merged
}

/// API Gateway escapes `/` in binary media types as `~1` (JSON-pointer style).
fn decode_media_type(raw: &str) -> String {
    raw.trim().replace("~1", "/")
}
