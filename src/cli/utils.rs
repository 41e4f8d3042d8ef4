use serde_json::{json, Value};

use crate::cli::OutputFormat;

/// Output a success message in the appropriate format. Object-valued `data`
/// is merged into the JSON envelope; text output prints its scalar fields.
pub fn output_success(output_format: OutputFormat, message: &str, data: Option<Value>) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&success_envelope(message, data))?);
        }
        OutputFormat::Text => {
            println!("✓ {}", message);
            if let Some(Value::Object(fields)) = data {
                for (key, value) in fields {
                    match value {
                        Value::String(s) => println!("  {}: {}", key, s),
                        Value::Null => {}
                        other => println!("  {}: {}", key, other),
                    }
                }
            }
        }
    }
    Ok(())
}

fn success_envelope(message: &str, data: Option<Value>) -> Value {
    let mut response = json!({
        "success": true,
        "message": message
    });

    match data {
        Some(Value::Object(fields)) => {
            if let Value::Object(map) = &mut response {
                map.extend(fields);
            }
        }
        Some(other) => response["data"] = other,
        None => {}
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_object_data_into_envelope() {
        let value = success_envelope("Bootstrapped", Some(json!({ "tenant": "acme", "token": "t" })));
        assert_eq!(value["success"], true);
        assert_eq!(value["tenant"], "acme");
        assert_eq!(value["token"], "t");
    }

    #[test]
    fn nests_non_object_data() {
        let value = success_envelope("Applied", Some(json!(["0001"])));
        assert_eq!(value["data"][0], "0001");
        assert!(success_envelope("Done", None).get("data").is_none());
    }
}
