use async_trait::async_trait;
use serde_json::{json, Map, Value};
use stepcore::StepError;
use stepruntime::{
    ActionMetadata, BlockAction, BlockContext, BlockOutcome, PropertyDefinition, PropertySchema,
    PropertyType,
};
use tracing::info;

/// Send an HTTP request and return status, headers and body
pub struct HttpRequest {
    client: reqwest::Client,
}

impl HttpRequest {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlockAction for HttpRequest {
    fn name(&self) -> &str {
        "send_request"
    }

    fn props(&self) -> PropertySchema {
        let mut props = PropertySchema::new();
        props.insert(
            "url".to_string(),
            PropertyDefinition::new("URL", PropertyType::ShortText).required(),
        );
        props.insert(
            "method".to_string(),
            PropertyDefinition::new("Method", PropertyType::Dropdown).with_default(json!("GET")),
        );
        props.insert(
            "headers".to_string(),
            PropertyDefinition::new("Headers", PropertyType::Object),
        );
        props.insert("body".to_string(), PropertyDefinition::new("Body", PropertyType::Json));
        props.insert(
            "failOnError".to_string(),
            PropertyDefinition::new("Fail on error status", PropertyType::Checkbox)
                .with_default(Value::Bool(true)),
        );
        props
    }

    fn metadata(&self) -> ActionMetadata {
        ActionMetadata {
            description: "Make HTTP requests".to_string(),
            category: "http".to_string(),
        }
    }

    async fn run(&self, ctx: &mut BlockContext) -> Result<BlockOutcome, StepError> {
        let url = ctx
            .require_prop("url")?
            .as_str()
            .ok_or_else(|| StepError::InvalidInput {
                field: "url".to_string(),
                message: "expected a string".to_string(),
            })?
            .to_string();
        let method = ctx.prop_str("method").unwrap_or("GET").to_uppercase();

        info!(step = %ctx.step_name, "{} {}", method, url);

        let mut request = match method.as_str() {
            "GET" => self.client.get(&url),
            "POST" => self.client.post(&url),
            "PUT" => self.client.put(&url),
            "PATCH" => self.client.patch(&url),
            "DELETE" => self.client.delete(&url),
            "HEAD" => self.client.head(&url),
            other => {
                return Err(StepError::InvalidInput {
                    field: "method".to_string(),
                    message: format!("unsupported method {}", other),
                })
            }
        };

        if let Some(Value::Object(headers)) = ctx.props_value.get("headers") {
            for (key, value) in headers {
                match value {
                    Value::String(s) => request = request.header(key, s),
                    Value::Null => {}
                    other => request = request.header(key, other.to_string()),
                }
            }
        }

        match ctx.props_value.get("body") {
            None | Some(Value::Null) => {}
            Some(Value::String(text)) => request = request.body(text.clone()),
            Some(body) => request = request.json(body),
        }

        let response = request
            .send()
            .await
            .map_err(|e| StepError::Execution(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let headers: Map<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_str().unwrap_or("").to_string())))
            .collect();
        let text = response
            .text()
            .await
            .map_err(|e| StepError::Execution(format!("Failed to read response: {}", e)))?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

        info!(step = %ctx.step_name, "Response status: {}", status.as_u16());

        let fail_on_error = ctx
            .props_value
            .get("failOnError")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        if fail_on_error && (status.is_client_error() || status.is_server_error()) {
            return Err(StepError::Execution(format!(
                "Request to {} failed with status {}: {}",
                url,
                status.as_u16(),
                body
            )));
        }

        Ok(BlockOutcome::Completed(json!({
            "status": status.as_u16(),
            "headers": headers,
            "body": body,
        })))
    }
}
