use anyhow::{anyhow, Result};
use include_dir::{include_dir, Dir};
use jsonschema::{Draft, JSONSchema};
use serde_json::Value;

static SCHEMAS_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/schemas");

pub const PLAN_SCHEMA: &str = "plan.json";
pub const RESULTS_SCHEMA: &str = "results.json";

pub fn schema_names() -> Vec<String> {
    SCHEMAS_DIR
        .files()
        .filter_map(|f| {
            f.path()
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
        })
        .collect()
}

pub fn load_schema(name: &str) -> Result<Value> {
    let file = SCHEMAS_DIR
        .get_file(name)
        .ok_or_else(|| anyhow!("schema not found: {}", name))?;
    let data = std::str::from_utf8(file.contents())?;
    Ok(serde_json::from_str(data)?)
}

pub fn compile_schema(name: &str) -> Result<JSONSchema> {
    let schema = load_schema(name)?;
    let schema = Box::leak(Box::new(schema));
    let compiled = JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(schema)
        .map_err(|e| anyhow!("invalid schema {}: {}", name, e))?;
    Ok(compiled)
}

/// Validate `value` against the named schema, joining every violation into
/// one error message.
pub fn validate(name: &str, value: &Value) -> Result<()> {
    let schema = compile_schema(name)?;
    if let Err(errors) = schema.validate(value) {
        let msgs = errors
            .map(|e| format!("{} at '{}'", e, e.instance_path))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(anyhow!("schema validation failed ({}): {}", name, msgs));
    }
    Ok(())
}
