//! Network tools.

use super::{clip, require_str, Tool, ToolContext};
use serde_json::Value;
use std::time::Duration;

pub struct FetchUrl;

impl Tool for FetchUrl {
    fn name(&self) -> &'static str {
        "fetch_url"
    }

    fn usage(&self) -> &'static str {
        "fetch a URL as text; args: {\"url\": \"https://...\"}"
    }

    fn invoke(&self, args: &Value, ctx: &ToolContext) -> Result<String, String> {
        let url = require_str(args, "url")?;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(format!("unsupported url scheme: {}", url));
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| format!("http client init: {}", e))?;

        let response = client
            .get(url)
            .send()
            .map_err(|e| format!("fetch failed: {}", e))?;
        let status = response.status();
        let body = response
            .text()
            .map_err(|e| format!("unreadable body: {}", e))?;

        Ok(clip(
            format!("status: {}\n{}", status.as_u16(), body),
            ctx.shell.max_output_bytes,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShellConfig;
    use crate::llm::test_support::StubClient;
    use crate::tools::test_support;
    use serde_json::json;

    #[test]
    fn test_rejects_non_http_schemes() {
        let governor = test_support::governor();
        let client = StubClient::scripted(&[]);
        let shell = ShellConfig::default();
        let ctx = ToolContext {
            governor: &governor,
            client: &client,
            shell: &shell,
        };
        let err = FetchUrl
            .invoke(&json!({"url": "file:///etc/passwd"}), &ctx)
            .unwrap_err();
        assert!(err.contains("unsupported url scheme"));
    }
}
