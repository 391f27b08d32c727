//! `http_request`: one raw HTTP exchange, for probing targets directly.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::json;

use crate::types::ToolResult;

#[derive(Debug, Deserialize)]
pub(super) struct HttpRequestArgs {
    url: String,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    body: Option<String>,
}

pub(super) async fn http_request(client: &reqwest::Client, args: HttpRequestArgs) -> ToolResult {
    let method_name = args.method.as_deref().unwrap_or("GET").to_uppercase();
    let method = match reqwest::Method::from_bytes(method_name.as_bytes()) {
        Ok(m) => m,
        Err(_) => return ToolResult::failure(format!("invalid HTTP method: {}", method_name)),
    };

    let mut request = client.request(method, &args.url);
    for (key, value) in &args.headers {
        request = request.header(key, value);
    }
    if let Some(body) = args.body {
        request = request.body(body);
    }

    let response = match request.send().await {
        Ok(r) => r,
        Err(e) => {
            return ToolResult::failure_with(
                format!("request failed: {}", e),
                json!({ "url": args.url, "method": method_name }),
            )
        }
    };

    let status = response.status().as_u16();
    let headers: HashMap<String, String> = response
        .headers()
        .iter()
        .map(|(k, v)| (k.to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
        .collect();
    let body = match response.text().await {
        Ok(b) => b,
        Err(e) => return ToolResult::failure(format!("failed to read response body: {}", e)),
    };

    // A 4xx/5xx is still a successful probe; the status is part of the payload.
    ToolResult::ok(json!({
        "url": args.url,
        "method": method_name,
        "status": status,
        "headers": headers,
        "body": body,
    }))
}
