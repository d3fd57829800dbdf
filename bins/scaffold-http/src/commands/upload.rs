//! Upload command - send a file as multipart form data

use crate::config::ConnectionArgs;
use crate::output;
use anyhow::{Context, Result};
use scaffold_api_client::{ApiRequest, MultipartForm};
use serde_json::Value;
use std::path::Path;

/// Run upload command
pub async fn run(
    args: &ConnectionArgs,
    path: &str,
    file: &Path,
    field: &str,
    extra: &[(String, String)],
    format: &str,
) -> Result<()> {
    let form = build_form(file, field, extra)?;
    tracing::debug!(file = %file.display(), parts = form.len(), "Uploading");

    let client = args.client()?;
    let request = args.apply(ApiRequest::post(path).multipart(form))?;
    let value: Value = client.send(request).await?;
    output::print_value(&value, format);
    Ok(())
}

fn build_form(file: &Path, field: &str, extra: &[(String, String)]) -> Result<MultipartForm> {
    let data =
        std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let file_name = file
        .file_name()
        .map_or_else(|| "upload".to_string(), |n| n.to_string_lossy().into_owned());

    let form = extra
        .iter()
        .fold(MultipartForm::new(), |form, (name, value)| form.text(name, value));

    Ok(form.file(field, data, file_name))
}
