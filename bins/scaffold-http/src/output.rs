//! Printing responses and failures

use owo_colors::OwoColorize;
use scaffold_api_client::ApiError;
use serde_json::{json, Value};

/// Print a decoded response body
pub fn print_value(value: &Value, format: &str) {
    let rendered = if format == "json" {
        value.to_string()
    } else {
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    };
    println!("{rendered}");
}

/// Print a request failure
///
/// JSON mode writes a machine-readable object to stdout; text mode writes
/// a coloured report to stderr.
pub fn print_api_error(error: &ApiError, format: &str) {
    if format == "json" {
        println!("{}", error_json(error));
        return;
    }

    eprintln!(
        "{} {} {}",
        "Error:".red().bold(),
        format!("[{}]", error.status).red(),
        error.message
    );

    if let Some(details) = &error.details {
        for (field, messages) in details {
            eprintln!("  {} {}", format!("{field}:").yellow(), messages);
        }
    }
}

fn error_json(error: &ApiError) -> Value {
    json!({
        "error": {
            "status": error.status,
            "message": error.message,
            "details": error.details,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_json_shape() {
        let error = ApiError::from_response(
            422,
            &json!({ "error": "Invalid", "details": { "email": ["taken"] } }),
        );
        assert_eq!(
            error_json(&error),
            json!({
                "error": {
                    "status": 422,
                    "message": "Invalid",
                    "details": { "email": ["taken"] }
                }
            })
        );
    }

    #[test]
    fn test_error_json_without_details() {
        let value = error_json(&ApiError::timeout());
        assert_eq!(value["error"]["status"], 408);
        assert!(value["error"]["details"].is_null());
    }
}
