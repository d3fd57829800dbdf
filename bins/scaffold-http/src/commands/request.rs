//! JSON request commands

use crate::config::ConnectionArgs;
use crate::output;
use anyhow::{Context, Result};
use scaffold_api_client::ApiRequest;
use serde_json::Value;

/// Methods that carry a JSON body
#[derive(Debug, Clone, Copy)]
pub enum BodyMethod {
    Post,
    Put,
    Patch,
}

/// Run `get`
pub async fn get(args: &ConnectionArgs, path: &str, format: &str) -> Result<()> {
    execute(args, ApiRequest::get(path), format).await
}

/// Run `delete`
pub async fn delete(args: &ConnectionArgs, path: &str, format: &str) -> Result<()> {
    execute(args, ApiRequest::delete(path), format).await
}

/// Run `post`, `put` or `patch`
///
/// A missing `--data` sends an empty JSON object.
pub async fn with_body(
    args: &ConnectionArgs,
    method: BodyMethod,
    path: &str,
    data: Option<&str>,
    format: &str,
) -> Result<()> {
    let body = parse_body(data)?;
    let request = match method {
        BodyMethod::Post => ApiRequest::post(path),
        BodyMethod::Put => ApiRequest::put(path),
        BodyMethod::Patch => ApiRequest::patch(path),
    };
    execute(args, request.json_value(body), format).await
}

async fn execute(args: &ConnectionArgs, request: ApiRequest, format: &str) -> Result<()> {
    let client = args.client()?;
    let request = args.apply(request)?;
    let value: Value = client.send(request).await?;
    output::print_value(&value, format);
    Ok(())
}

fn parse_body(data: Option<&str>) -> Result<Value> {
    match data {
        Some(raw) => serde_json::from_str(raw).context("--data is not valid JSON"),
        None => Ok(Value::Object(serde_json::Map::new())),
    }
}
