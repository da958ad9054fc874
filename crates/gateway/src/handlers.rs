//! Tool handlers: translate validated arguments into upstream calls.
//!
//! Handlers consume the upstream primitives and nothing else; they never
//! acquire tokens or retry on their own.

use crate::catalog::{HandlerFuture, JsonMap, ToolContext};
use crate::error::GatewayError;
use serde_json::{json, Value};

fn arg_str<'a>(args: &'a JsonMap, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

/// Required string argument. Schema validation guarantees presence; this is
/// the typed accessor for the handler body.
fn require_str<'a>(args: &'a JsonMap, key: &str) -> Result<&'a str, GatewayError> {
    arg_str(args, key)
        .ok_or_else(|| GatewayError::InvalidArguments(format!("missing required property '{key}'")))
}

/// Compose the opaque brace-delimited filter expression from the high-level
/// arguments. An explicit `q` wins outright.
fn compose_q(args: &JsonMap) -> Option<String> {
    if let Some(raw) = arg_str(args, "q") {
        let raw = raw.trim();
        if !raw.is_empty() {
            return Some(raw.to_string());
        }
    }

    let mut clauses = Vec::new();
    let duration = arg_str(args, "duration").unwrap_or("1h");
    clauses.push(format!("timewindow:'{duration}'"));
    if let Some(v) = arg_str(args, "status") {
        clauses.push(format!("status:'{v}'"));
    }
    if let Some(v) = arg_str(args, "integrationStyle") {
        clauses.push(format!("integration-style:'{v}'"));
    }
    if let Some(v) = arg_str(args, "recoverable") {
        clauses.push(format!("recoverable:'{v}'"));
    }
    if let Some(v) = arg_str(args, "includePurged") {
        clauses.push(format!("includePurged:'{v}'"));
    }
    Some(format!("{{{}}}", clauses.join(", ")))
}

async fn list(ctx: &ToolContext<'_>, args: &JsonMap, path: &str) -> Result<Value, GatewayError> {
    let q = compose_q(args);
    let page = ctx
        .upstream
        .get_paginated(ctx.tenant, ctx.config, path, Vec::new(), q)
        .await?;
    Ok(serde_json::to_value(page)?)
}

async fn detail(ctx: &ToolContext<'_>, path: String) -> Result<Value, GatewayError> {
    ctx.upstream
        .get_single(ctx.tenant, ctx.config, &path, &[])
        .await
}

async fn mutate(ctx: &ToolContext<'_>, path: String) -> Result<Value, GatewayError> {
    ctx.upstream
        .post(ctx.tenant, ctx.config, &path, &[], &json!({}))
        .await
}

// Instances

pub(crate) fn instances<'a>(ctx: &'a ToolContext<'a>, args: &'a JsonMap) -> HandlerFuture<'a> {
    Box::pin(list(ctx, args, "instances"))
}

pub(crate) fn instance_details<'a>(
    ctx: &'a ToolContext<'a>,
    args: &'a JsonMap,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        let id = require_str(args, "instanceId")?;
        detail(ctx, format!("instances/{id}")).await
    })
}

pub(crate) fn instance_activity_stream<'a>(
    ctx: &'a ToolContext<'a>,
    args: &'a JsonMap,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        let id = require_str(args, "instanceId")?;
        detail(ctx, format!("instances/{id}/activityStream")).await
    })
}

pub(crate) fn instance_activity_stream_detail<'a>(
    ctx: &'a ToolContext<'a>,
    args: &'a JsonMap,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        let id = require_str(args, "instanceId")?;
        let key = require_str(args, "itemKey")?;
        detail(ctx, format!("instances/{id}/activityStream/{key}")).await
    })
}

pub(crate) fn instance_logs<'a>(ctx: &'a ToolContext<'a>, args: &'a JsonMap) -> HandlerFuture<'a> {
    Box::pin(async move {
        let id = require_str(args, "instanceId")?;
        let text = ctx
            .upstream
            .get_text(ctx.tenant, ctx.config, &format!("instances/{id}/logs"), &[])
            .await?;
        // Returned as a JSON string so the dispatcher emits it verbatim.
        Ok(Value::String(text))
    })
}

pub(crate) fn abort_instance<'a>(ctx: &'a ToolContext<'a>, args: &'a JsonMap) -> HandlerFuture<'a> {
    Box::pin(async move {
        let id = require_str(args, "instanceId")?;
        mutate(ctx, format!("instances/{id}/abort")).await
    })
}

// Integrations

pub(crate) fn integrations<'a>(ctx: &'a ToolContext<'a>, args: &'a JsonMap) -> HandlerFuture<'a> {
    Box::pin(list(ctx, args, "integrations"))
}

pub(crate) fn integration_details<'a>(
    ctx: &'a ToolContext<'a>,
    args: &'a JsonMap,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        let id = require_str(args, "integrationId")?;
        detail(ctx, format!("integrations/{id}")).await
    })
}

pub(crate) fn integration_message_counts<'a>(
    ctx: &'a ToolContext<'a>,
    args: &'a JsonMap,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        let id = require_str(args, "integrationId")?;
        let params = vec![(
            "q".to_string(),
            compose_q(args).unwrap_or_else(|| "{timewindow:'1h'}".to_string()),
        )];
        ctx.upstream
            .get_single(
                ctx.tenant,
                ctx.config,
                &format!("integrations/{id}/messageCounts"),
                &params,
            )
            .await
    })
}

pub(crate) fn integration_history<'a>(
    ctx: &'a ToolContext<'a>,
    args: &'a JsonMap,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        let id = require_str(args, "integrationId")?;
        let q = compose_q(args);
        let page = ctx
            .upstream
            .get_paginated(
                ctx.tenant,
                ctx.config,
                &format!("integrations/{id}/history"),
                Vec::new(),
                q,
            )
            .await?;
        Ok(serde_json::to_value(page)?)
    })
}

// Agents

pub(crate) fn agent_groups<'a>(ctx: &'a ToolContext<'a>, args: &'a JsonMap) -> HandlerFuture<'a> {
    Box::pin(async move {
        // Agent groups are not time-windowed; only a raw q passes through.
        let q = arg_str(args, "q")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let page = ctx
            .upstream
            .get_paginated(ctx.tenant, ctx.config, "agentgroups", Vec::new(), q)
            .await?;
        Ok(serde_json::to_value(page)?)
    })
}

pub(crate) fn agent_group_details<'a>(
    ctx: &'a ToolContext<'a>,
    args: &'a JsonMap,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        let id = require_str(args, "agentGroupId")?;
        detail(ctx, format!("agentgroups/{id}")).await
    })
}

pub(crate) fn agents_in_group<'a>(
    ctx: &'a ToolContext<'a>,
    args: &'a JsonMap,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        let id = require_str(args, "agentGroupId")?;
        let page = ctx
            .upstream
            .get_paginated(
                ctx.tenant,
                ctx.config,
                &format!("agentgroups/{id}/agents"),
                Vec::new(),
                None,
            )
            .await?;
        Ok(serde_json::to_value(page)?)
    })
}

pub(crate) fn agent_details<'a>(ctx: &'a ToolContext<'a>, args: &'a JsonMap) -> HandlerFuture<'a> {
    Box::pin(async move {
        let id = require_str(args, "agentId")?;
        detail(ctx, format!("agents/{id}")).await
    })
}

// Errored instances

pub(crate) fn errored_instances<'a>(
    ctx: &'a ToolContext<'a>,
    args: &'a JsonMap,
) -> HandlerFuture<'a> {
    Box::pin(list(ctx, args, "errors"))
}

pub(crate) fn errored_instance_details<'a>(
    ctx: &'a ToolContext<'a>,
    args: &'a JsonMap,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        let id = require_str(args, "errorId")?;
        detail(ctx, format!("errors/{id}")).await
    })
}

pub(crate) fn discard_errored_instance<'a>(
    ctx: &'a ToolContext<'a>,
    args: &'a JsonMap,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        let id = require_str(args, "errorId")?;
        mutate(ctx, format!("errors/{id}/discard")).await
    })
}

pub(crate) fn discard_errored_instances<'a>(
    ctx: &'a ToolContext<'a>,
    args: &'a JsonMap,
) -> HandlerFuture<'a> {
    Box::pin(bulk_mutation(ctx, args, "discard"))
}

pub(crate) fn resubmit_errored_instance<'a>(
    ctx: &'a ToolContext<'a>,
    args: &'a JsonMap,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        let id = require_str(args, "errorId")?;
        mutate(ctx, format!("errors/{id}/resubmit")).await
    })
}

pub(crate) fn resubmit_errored_instances<'a>(
    ctx: &'a ToolContext<'a>,
    args: &'a JsonMap,
) -> HandlerFuture<'a> {
    Box::pin(bulk_mutation(ctx, args, "resubmit"))
}

// Recovery jobs / audit / scheduled runs

pub(crate) fn recovery_jobs<'a>(ctx: &'a ToolContext<'a>, args: &'a JsonMap) -> HandlerFuture<'a> {
    Box::pin(list(ctx, args, "recoveryJobs"))
}

pub(crate) fn recovery_job_details<'a>(
    ctx: &'a ToolContext<'a>,
    args: &'a JsonMap,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        let id = require_str(args, "jobId")?;
        detail(ctx, format!("recoveryJobs/{id}")).await
    })
}

pub(crate) fn audit_records<'a>(ctx: &'a ToolContext<'a>, args: &'a JsonMap) -> HandlerFuture<'a> {
    Box::pin(list(ctx, args, "auditRecords"))
}

pub(crate) fn scheduled_runs<'a>(ctx: &'a ToolContext<'a>, args: &'a JsonMap) -> HandlerFuture<'a> {
    Box::pin(list(ctx, args, "scheduledRuns"))
}

/// Sequential per-id fan-out for the bulk mutations. Individual failures are
/// caught and aggregated; input order is preserved in `details`.
async fn bulk_mutation(
    ctx: &ToolContext<'_>,
    args: &JsonMap,
    action: &str,
) -> Result<Value, GatewayError> {
    let ids: Vec<String> = args
        .get("instanceIds")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .ok_or_else(|| {
            GatewayError::InvalidArguments("missing required property 'instanceIds'".to_string())
        })?;

    let mut details = Vec::with_capacity(ids.len());
    let mut job_ids = Vec::new();
    let mut success_count = 0u64;
    let mut failed_count = 0u64;

    for id in &ids {
        match ctx
            .upstream
            .post(
                ctx.tenant,
                ctx.config,
                &format!("errors/{id}/{action}"),
                &[],
                &json!({}),
            )
            .await
        {
            Ok(resp) => {
                let job_id = extract_job_id(&resp);
                let reported_ok = resp
                    .get("resubmitSuccessful")
                    .or_else(|| resp.get("discardSuccessful"))
                    .and_then(Value::as_bool)
                    .unwrap_or(true);

                let mut entry = serde_json::Map::new();
                entry.insert("id".to_string(), json!(id));
                if reported_ok {
                    success_count += 1;
                    if let Some(job) = &job_id {
                        job_ids.push(job.clone());
                        entry.insert("jobId".to_string(), json!(job));
                    }
                    entry.insert("success".to_string(), json!(true));
                } else {
                    failed_count += 1;
                    entry.insert("success".to_string(), json!(false));
                    entry.insert(
                        "error".to_string(),
                        json!(format!("upstream reported {action} as unsuccessful")),
                    );
                }
                details.push(Value::Object(entry));
            }
            Err(e) => {
                failed_count += 1;
                details.push(json!({
                    "id": id,
                    "success": false,
                    "error": e.tool_message(ctx.tool),
                }));
            }
        }
    }

    Ok(json!({
        "totalRequested": ids.len(),
        "successCount": success_count,
        "failedCount": failed_count,
        "recoveryJobIds": job_ids,
        "details": details,
    }))
}

fn extract_job_id(resp: &Value) -> Option<String> {
    ["recoveryJobId", "jobId", "id"]
        .iter()
        .find_map(|key| resp.get(*key).and_then(Value::as_str).map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(value: Value) -> JsonMap {
        value.as_object().expect("object").clone()
    }

    #[test]
    fn compose_q_defaults_to_a_one_hour_window() {
        let q = compose_q(&args(json!({"tenant": "dev"})));
        assert_eq!(q.as_deref(), Some("{timewindow:'1h'}"));
    }

    #[test]
    fn compose_q_collects_high_level_filters() {
        let q = compose_q(&args(json!({
            "tenant": "prod1",
            "duration": "1d",
            "status": "FAILED",
            "integrationStyle": "appdriven",
            "includePurged": "no"
        })));
        assert_eq!(
            q.as_deref(),
            Some("{timewindow:'1d', status:'FAILED', integration-style:'appdriven', includePurged:'no'}")
        );
    }

    #[test]
    fn explicit_q_overrides_composition() {
        let q = compose_q(&args(json!({
            "tenant": "dev",
            "duration": "3d",
            "q": "{timewindow:'6h', recoverable:'true'}"
        })));
        assert_eq!(q.as_deref(), Some("{timewindow:'6h', recoverable:'true'}"));
    }

    #[test]
    fn job_id_extraction_tries_keys_in_order() {
        assert_eq!(
            extract_job_id(&json!({"recoveryJobId": "J1", "id": "x"})).as_deref(),
            Some("J1")
        );
        assert_eq!(extract_job_id(&json!({"id": "x"})).as_deref(), Some("x"));
        assert_eq!(extract_job_id(&json!({"status": "ok"})), None);
    }
}
