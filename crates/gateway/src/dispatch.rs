use crate::catalog::{validate_args, Catalog, JsonMap, ToolContext};
use crate::error::GatewayError;
use crate::tenant::TenantRegistry;
use crate::upstream::UpstreamClient;
use serde_json::{json, Value};
use std::time::Instant;
use tracing::Instrument as _;

/// Execute a `tools/call` end to end and shape the MCP content envelope.
///
/// Failures never escape as JSON-RPC errors; they become `isError=true`
/// content with the classified diagnostic.
pub async fn dispatch_tool_call(
    catalog: &Catalog,
    tenants: &TenantRegistry,
    upstream: &UpstreamClient,
    name: &str,
    arguments: Option<&Value>,
) -> Value {
    let span = tracing::info_span!("tools.call", tool = %name);
    async move {
        let started = Instant::now();
        match run(catalog, tenants, upstream, name, arguments).await {
            Ok(payload) => {
                tracing::info!(
                    tool = %name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "tool call succeeded"
                );
                success_envelope(payload)
            }
            Err(e) => {
                tracing::warn!(
                    tool = %name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %e,
                    "tool call failed"
                );
                error_envelope(&e.tool_message(name))
            }
        }
    }
    .instrument(span)
    .await
}

async fn run(
    catalog: &Catalog,
    tenants: &TenantRegistry,
    upstream: &UpstreamClient,
    name: &str,
    arguments: Option<&Value>,
) -> Result<Value, GatewayError> {
    let def = catalog
        .get(name)
        .ok_or_else(|| GatewayError::UnknownTool(name.to_string()))?;

    let args: JsonMap = match arguments {
        None | Some(Value::Null) => JsonMap::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => {
            return Err(GatewayError::InvalidArguments(
                "arguments must be an object".to_string(),
            ));
        }
    };
    validate_args(&def.input_schema, &args)?;

    let tenant_name = args
        .get("tenant")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::InvalidArguments(
            "missing required property 'tenant'".to_string(),
        ))?;
    let (tenant, config) = tenants.config_for(tenant_name)?;

    // Prime the cache before entering the handler so credential problems
    // surface as auth failures rather than mid-pagination errors.
    upstream.tokens().bearer(tenant, config).await?;

    let ctx = ToolContext {
        tool: name,
        tenant,
        config,
        upstream,
    };
    let deadline = def.deadline();
    match tokio::time::timeout(deadline, (def.handler)(&ctx, &args)).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Cancelled(format!(
            "tool '{name}' exceeded its {}s deadline",
            deadline.as_secs()
        ))),
    }
}

fn success_envelope(payload: Value) -> Value {
    // A string payload (the logs tool) is emitted verbatim; everything else
    // is the JSON serialization of the handler's result.
    let text = match payload {
        Value::String(s) => s,
        other => serde_json::to_string_pretty(&other).unwrap_or_else(|_| other.to_string()),
    };
    json!({ "content": [{ "type": "text", "text": text }] })
}

fn error_envelope(message: &str) -> Value {
    json!({
        "content": [{ "type": "text", "text": message }],
        "isError": true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token_cache::TokenCache;
    use std::sync::Arc;

    fn fixture(dir: &std::path::Path) -> (Catalog, TenantRegistry, UpstreamClient) {
        let http = reqwest::Client::new();
        let tokens = Arc::new(TokenCache::new(http.clone(), dir.to_path_buf()));
        (
            Catalog::new(),
            TenantRegistry::from_pairs(Vec::new()),
            UpstreamClient::new(http, tokens),
        )
    }

    fn envelope_text(envelope: &Value) -> &str {
        envelope["content"][0]["text"].as_str().expect("text block")
    }

    #[tokio::test]
    async fn unknown_tool_yields_error_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (catalog, tenants, upstream) = fixture(dir.path());
        let envelope =
            dispatch_tool_call(&catalog, &tenants, &upstream, "monitoringNope", None).await;
        assert_eq!(envelope["isError"], json!(true));
        assert_eq!(envelope_text(&envelope), "Unknown tool: monitoringNope");
    }

    #[tokio::test]
    async fn schema_violation_fails_before_any_upstream_traffic() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (catalog, tenants, upstream) = fixture(dir.path());
        // No mock upstream exists; reaching the network would fail with a
        // transport error, so an InvalidArguments message proves the call
        // never left the dispatcher.
        let envelope = dispatch_tool_call(
            &catalog,
            &tenants,
            &upstream,
            "monitoringInstances",
            Some(&json!({"tenant": "dev", "duration": "4w"})),
        )
        .await;
        assert_eq!(envelope["isError"], json!(true));
        assert!(envelope_text(&envelope).starts_with("Invalid arguments:"));
    }

    #[tokio::test]
    async fn unknown_tenant_is_named_and_never_reaches_token_acquisition() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (catalog, tenants, upstream) = fixture(dir.path());
        let envelope = dispatch_tool_call(
            &catalog,
            &tenants,
            &upstream,
            "monitoringErroredInstances",
            Some(&json!({"tenant": "staging"})),
        )
        .await;
        assert_eq!(envelope["isError"], json!(true));
        assert_eq!(envelope_text(&envelope), "Unknown tenant: staging");
    }

    #[tokio::test]
    async fn unconfigured_tenant_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (catalog, tenants, upstream) = fixture(dir.path());
        let envelope = dispatch_tool_call(
            &catalog,
            &tenants,
            &upstream,
            "monitoringErroredInstances",
            Some(&json!({"tenant": "dev"})),
        )
        .await;
        assert_eq!(envelope["isError"], json!(true));
        assert!(envelope_text(&envelope).contains("Tenant 'dev' is not configured"));
    }

    #[tokio::test]
    async fn non_object_arguments_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (catalog, tenants, upstream) = fixture(dir.path());
        let envelope = dispatch_tool_call(
            &catalog,
            &tenants,
            &upstream,
            "monitoringInstances",
            Some(&json!([1, 2, 3])),
        )
        .await;
        assert_eq!(envelope["isError"], json!(true));
        assert_eq!(
            envelope_text(&envelope),
            "Invalid arguments: arguments must be an object"
        );
    }
}
