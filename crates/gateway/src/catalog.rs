use crate::error::GatewayError;
use crate::handlers;
use crate::tenant::{Tenant, TenantConfig};
use crate::upstream::UpstreamClient;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

pub type JsonMap = serde_json::Map<String, Value>;

pub type HandlerFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Value, GatewayError>> + Send + 'a>>;

/// Handler binding: plain function reference, no inheritance, no reflection.
pub type Handler = for<'a> fn(&'a ToolContext<'a>, &'a JsonMap) -> HandlerFuture<'a>;

/// Everything a handler may touch: the resolved tenant, its config snapshot
/// and the upstream primitives. Token acquisition stays out of reach.
pub struct ToolContext<'a> {
    pub tool: &'a str,
    pub tenant: Tenant,
    pub config: &'a TenantConfig,
    pub upstream: &'a UpstreamClient,
}

pub struct ToolDef {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
    pub handler: Handler,
    /// Paginated tools get the long call deadline.
    pub paginated: bool,
}

impl ToolDef {
    pub fn deadline(&self) -> Duration {
        if self.paginated {
            Duration::from_secs(120)
        } else {
            Duration::from_secs(30)
        }
    }
}

/// The static tool catalog. Constructed once at startup, immutable after.
pub struct Catalog {
    tools: Vec<ToolDef>,
    index: HashMap<&'static str, usize>,
    listing: Value,
}

impl Catalog {
    pub fn new() -> Self {
        let tools = definitions();
        let mut index = HashMap::new();
        for (i, def) in tools.iter().enumerate() {
            let previous = index.insert(def.name, i);
            assert!(previous.is_none(), "duplicate tool name: {}", def.name);
        }
        let listing = Value::Array(
            tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "inputSchema": t.input_schema,
                    })
                })
                .collect(),
        );
        Self {
            tools,
            index,
            listing,
        }
    }

    pub fn get(&self, name: &str) -> Option<&ToolDef> {
        self.index.get(name).map(|i| &self.tools[*i])
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.name).collect()
    }

    /// The `tools/list` payload. Built once so repeated listings are
    /// byte-identical within a process lifetime.
    pub fn listing(&self) -> &Value {
        &self.listing
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate a parsed argument object against a tool's input schema.
///
/// Missing required properties, enum violations and type mismatches each
/// name the offending field; unknown extra properties are ignored.
pub fn validate_args(schema: &Value, args: &JsonMap) -> Result<(), GatewayError> {
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !args.contains_key(name) {
                return Err(GatewayError::InvalidArguments(format!(
                    "missing required property '{name}'"
                )));
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };
    for (key, value) in args {
        if let Some(prop) = properties.get(key) {
            check_property(key, prop, value)?;
        }
    }
    Ok(())
}

fn check_property(key: &str, prop: &Value, value: &Value) -> Result<(), GatewayError> {
    let invalid = |expected: &str| {
        GatewayError::InvalidArguments(format!(
            "invalid value for property '{key}': expected {expected}"
        ))
    };

    match prop.get("type").and_then(Value::as_str).unwrap_or("string") {
        "string" => {
            if !value.is_string() {
                return Err(invalid("string"));
            }
            check_enum(key, prop, value)?;
        }
        "integer" => {
            if value.as_i64().is_none() {
                return Err(invalid("integer"));
            }
            check_bounds(key, prop, value)?;
        }
        "number" => {
            if !value.is_number() {
                return Err(invalid("number"));
            }
            check_bounds(key, prop, value)?;
        }
        "boolean" => {
            if !value.is_boolean() {
                return Err(invalid("boolean"));
            }
        }
        "array" => {
            let Some(elements) = value.as_array() else {
                return Err(invalid("array"));
            };
            if let Some(min) = prop.get("minItems").and_then(Value::as_u64) {
                if (elements.len() as u64) < min {
                    return Err(GatewayError::InvalidArguments(format!(
                        "property '{key}' requires at least {min} item(s)"
                    )));
                }
            }
            if let Some(max) = prop.get("maxItems").and_then(Value::as_u64) {
                if (elements.len() as u64) > max {
                    return Err(GatewayError::InvalidArguments(format!(
                        "property '{key}' accepts at most {max} items"
                    )));
                }
            }
            if let Some(item_type) = prop
                .get("items")
                .and_then(|i| i.get("type"))
                .and_then(Value::as_str)
            {
                let ok = elements.iter().all(|el| match item_type {
                    "string" => el.is_string(),
                    "integer" => el.as_i64().is_some(),
                    "number" => el.is_number(),
                    "boolean" => el.is_boolean(),
                    _ => true,
                });
                if !ok {
                    return Err(GatewayError::InvalidArguments(format!(
                        "property '{key}' items must be of type {item_type}"
                    )));
                }
            }
        }
        _ => {}
    }
    Ok(())
}

fn check_enum(key: &str, prop: &Value, value: &Value) -> Result<(), GatewayError> {
    let Some(allowed) = prop.get("enum").and_then(Value::as_array) else {
        return Ok(());
    };
    if allowed.contains(value) {
        return Ok(());
    }
    let rendered: Vec<String> = allowed
        .iter()
        .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string))
        .collect();
    Err(GatewayError::InvalidArguments(format!(
        "invalid value for property '{key}': must be one of [{}]",
        rendered.join(", ")
    )))
}

fn check_bounds(key: &str, prop: &Value, value: &Value) -> Result<(), GatewayError> {
    let n = value.as_f64().unwrap_or(0.0);
    if let Some(min) = prop.get("minimum").and_then(Value::as_f64) {
        if n < min {
            return Err(GatewayError::InvalidArguments(format!(
                "property '{key}' must be at least {min}"
            )));
        }
    }
    if let Some(max) = prop.get("maximum").and_then(Value::as_f64) {
        if n > max {
            return Err(GatewayError::InvalidArguments(format!(
                "property '{key}' must be at most {max}"
            )));
        }
    }
    Ok(())
}

// Schema fragments shared across tool definitions.

fn tenant_prop() -> Value {
    // Plain string on purpose: an out-of-set value must classify as an
    // unknown tenant, not a schema violation.
    json!({
        "type": "string",
        "description": "Target environment: dev, qa3, prod1 or prod3"
    })
}

fn duration_prop() -> Value {
    json!({
        "type": "string",
        "description": "Time window the listing covers",
        "enum": ["1h", "6h", "1d", "2d", "3d"],
        "default": "1h"
    })
}

fn q_prop() -> Value {
    json!({
        "type": "string",
        "description": "Raw filter expression, e.g. {timewindow:'1h', status:'FAILED'}; overrides the composed filter"
    })
}

fn id_prop(desc: &str) -> Value {
    json!({ "type": "string", "description": desc })
}

fn instance_ids_prop(action: &str) -> Value {
    json!({
        "type": "array",
        "description": format!("Errored instance ids to {action} (1-50)"),
        "items": { "type": "string" },
        "minItems": 1,
        "maxItems": 50
    })
}

fn definitions() -> Vec<ToolDef> {
    vec![
        // Instances
        ToolDef {
            name: "monitoringInstances",
            description: "List integration instances for a time window, paginated to completion",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "tenant": tenant_prop(),
                    "duration": duration_prop(),
                    "status": {
                        "type": "string",
                        "description": "Instance status filter",
                        "enum": ["IN_PROGRESS", "COMPLETED", "FAILED", "ABORTED"]
                    },
                    "integrationStyle": {
                        "type": "string",
                        "description": "Integration style filter",
                        "enum": ["appdriven", "scheduled"]
                    },
                    "q": q_prop()
                },
                "required": ["tenant"]
            }),
            handler: handlers::instances,
            paginated: true,
        },
        ToolDef {
            name: "monitoringInstanceDetails",
            description: "Details of a single integration instance",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "tenant": tenant_prop(),
                    "instanceId": id_prop("Instance id")
                },
                "required": ["tenant", "instanceId"]
            }),
            handler: handlers::instance_details,
            paginated: false,
        },
        ToolDef {
            name: "monitoringInstanceActivityStream",
            description: "Activity stream of an integration instance",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "tenant": tenant_prop(),
                    "instanceId": id_prop("Instance id")
                },
                "required": ["tenant", "instanceId"]
            }),
            handler: handlers::instance_activity_stream,
            paginated: false,
        },
        ToolDef {
            name: "monitoringInstanceActivityStreamDetail",
            description: "One activity stream entry of an instance, by item key",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "tenant": tenant_prop(),
                    "instanceId": id_prop("Instance id"),
                    "itemKey": id_prop("Activity stream item key")
                },
                "required": ["tenant", "instanceId", "itemKey"]
            }),
            handler: handlers::instance_activity_stream_detail,
            paginated: false,
        },
        ToolDef {
            name: "monitoringInstanceLogs",
            description: "Raw activity log of an integration instance, as text",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "tenant": tenant_prop(),
                    "instanceId": id_prop("Instance id")
                },
                "required": ["tenant", "instanceId"]
            }),
            handler: handlers::instance_logs,
            paginated: false,
        },
        ToolDef {
            name: "monitoringAbortInstance",
            description: "Abort a running integration instance",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "tenant": tenant_prop(),
                    "instanceId": id_prop("Instance id to abort")
                },
                "required": ["tenant", "instanceId"]
            }),
            handler: handlers::abort_instance,
            paginated: false,
        },
        // Integrations
        ToolDef {
            name: "monitoringIntegrations",
            description: "List integrations with their monitoring status, paginated to completion",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "tenant": tenant_prop(),
                    "duration": duration_prop(),
                    "q": q_prop()
                },
                "required": ["tenant"]
            }),
            handler: handlers::integrations,
            paginated: true,
        },
        ToolDef {
            name: "monitoringIntegrationDetails",
            description: "Monitoring details of a single integration",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "tenant": tenant_prop(),
                    "integrationId": id_prop("Integration id (NAME|VERSION)")
                },
                "required": ["tenant", "integrationId"]
            }),
            handler: handlers::integration_details,
            paginated: false,
        },
        ToolDef {
            name: "monitoringIntegrationMessageCounts",
            description: "Received/processed/failed message counts of an integration",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "tenant": tenant_prop(),
                    "integrationId": id_prop("Integration id (NAME|VERSION)"),
                    "duration": duration_prop()
                },
                "required": ["tenant", "integrationId"]
            }),
            handler: handlers::integration_message_counts,
            paginated: false,
        },
        ToolDef {
            name: "monitoringIntegrationHistory",
            description: "Activation/deactivation history of an integration, paginated to completion",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "tenant": tenant_prop(),
                    "integrationId": id_prop("Integration id (NAME|VERSION)"),
                    "duration": duration_prop(),
                    "q": q_prop()
                },
                "required": ["tenant", "integrationId"]
            }),
            handler: handlers::integration_history,
            paginated: true,
        },
        // Agents
        ToolDef {
            name: "monitoringAgentGroups",
            description: "List connectivity agent groups, paginated to completion",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "tenant": tenant_prop(),
                    "q": q_prop()
                },
                "required": ["tenant"]
            }),
            handler: handlers::agent_groups,
            paginated: true,
        },
        ToolDef {
            name: "monitoringAgentGroupDetails",
            description: "Details of a connectivity agent group",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "tenant": tenant_prop(),
                    "agentGroupId": id_prop("Agent group id")
                },
                "required": ["tenant", "agentGroupId"]
            }),
            handler: handlers::agent_group_details,
            paginated: false,
        },
        ToolDef {
            name: "monitoringAgentsInGroup",
            description: "List agents registered in a group, paginated to completion",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "tenant": tenant_prop(),
                    "agentGroupId": id_prop("Agent group id")
                },
                "required": ["tenant", "agentGroupId"]
            }),
            handler: handlers::agents_in_group,
            paginated: true,
        },
        ToolDef {
            name: "monitoringAgentDetails",
            description: "Details of a single connectivity agent",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "tenant": tenant_prop(),
                    "agentId": id_prop("Agent id")
                },
                "required": ["tenant", "agentId"]
            }),
            handler: handlers::agent_details,
            paginated: false,
        },
        // Errored instances
        ToolDef {
            name: "monitoringErroredInstances",
            description: "List errored integration instances for a time window, paginated to completion",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "tenant": tenant_prop(),
                    "duration": duration_prop(),
                    "integrationStyle": {
                        "type": "string",
                        "description": "Integration style filter",
                        "enum": ["appdriven", "scheduled"]
                    },
                    "recoverable": {
                        "type": "string",
                        "description": "Only recoverable (or only unrecoverable) errors",
                        "enum": ["true", "false"]
                    },
                    "includePurged": {
                        "type": "string",
                        "description": "Include purged instances",
                        "enum": ["yes", "no"]
                    },
                    "q": q_prop()
                },
                "required": ["tenant"]
            }),
            handler: handlers::errored_instances,
            paginated: true,
        },
        ToolDef {
            name: "monitoringErroredInstanceDetails",
            description: "Details of a single errored instance",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "tenant": tenant_prop(),
                    "errorId": id_prop("Errored instance id")
                },
                "required": ["tenant", "errorId"]
            }),
            handler: handlers::errored_instance_details,
            paginated: false,
        },
        ToolDef {
            name: "monitoringDiscardErroredInstance",
            description: "Discard one errored instance",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "tenant": tenant_prop(),
                    "errorId": id_prop("Errored instance id to discard")
                },
                "required": ["tenant", "errorId"]
            }),
            handler: handlers::discard_errored_instance,
            paginated: false,
        },
        ToolDef {
            name: "monitoringDiscardErroredInstances",
            description: "Discard up to 50 errored instances, one mutation per id",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "tenant": tenant_prop(),
                    "instanceIds": instance_ids_prop("discard")
                },
                "required": ["tenant", "instanceIds"]
            }),
            handler: handlers::discard_errored_instances,
            paginated: false,
        },
        ToolDef {
            name: "monitoringResubmitErroredInstance",
            description: "Resubmit one errored instance",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "tenant": tenant_prop(),
                    "errorId": id_prop("Errored instance id to resubmit")
                },
                "required": ["tenant", "errorId"]
            }),
            handler: handlers::resubmit_errored_instance,
            paginated: false,
        },
        ToolDef {
            name: "monitoringResubmitErroredInstances",
            description: "Resubmit up to 50 errored instances, one mutation per id",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "tenant": tenant_prop(),
                    "instanceIds": instance_ids_prop("resubmit")
                },
                "required": ["tenant", "instanceIds"]
            }),
            handler: handlers::resubmit_errored_instances,
            paginated: false,
        },
        // Error recovery jobs
        ToolDef {
            name: "monitoringRecoveryJobs",
            description: "List error recovery jobs, paginated to completion",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "tenant": tenant_prop(),
                    "duration": duration_prop(),
                    "q": q_prop()
                },
                "required": ["tenant"]
            }),
            handler: handlers::recovery_jobs,
            paginated: true,
        },
        ToolDef {
            name: "monitoringRecoveryJobDetails",
            description: "Details of a single error recovery job",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "tenant": tenant_prop(),
                    "jobId": id_prop("Recovery job id")
                },
                "required": ["tenant", "jobId"]
            }),
            handler: handlers::recovery_job_details,
            paginated: false,
        },
        // Audit records
        ToolDef {
            name: "monitoringAuditRecords",
            description: "List audit records for a time window, paginated to completion",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "tenant": tenant_prop(),
                    "duration": duration_prop(),
                    "q": q_prop()
                },
                "required": ["tenant"]
            }),
            handler: handlers::audit_records,
            paginated: true,
        },
        // Scheduled runs
        ToolDef {
            name: "monitoringScheduledRuns",
            description: "List scheduled integration runs, paginated to completion",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "tenant": tenant_prop(),
                    "duration": duration_prop(),
                    "q": q_prop()
                },
                "required": ["tenant"]
            }),
            handler: handlers::scheduled_runs,
            paginated: true,
        },
    ]
}
