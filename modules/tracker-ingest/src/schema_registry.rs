//! Per-kind JSON Schemas for the tracker's event families
//!
//! Off unless `EVENT_SCHEMA_ENFORCE=true`. Kinds without a dedicated schema
//! are checked against the base envelope schema only.

use jsonschema::JSONSchema;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::validation::{FailureReason, InboundEnvelope};

const PROJECT_KINDS: [&str; 3] = ["project.created", "project.updated", "project.deleted"];
const COMPONENT_KINDS: [&str; 4] = [
    "component.created",
    "component.updated",
    "component.linked",
    "component.unlinked",
];
const TASK_KINDS: [&str; 4] = ["task.created", "task.updated", "task.completed", "task.assigned"];
const METRIC_KINDS: [&str; 3] = ["metric.gauge", "metric.counter", "metric.histogram"];

/// Compiled schemas keyed by event kind
///
/// Cheap to clone: families share one compiled schema behind an `Arc`.
#[derive(Clone)]
pub struct SchemaRegistry {
    base: Arc<JSONSchema>,
    by_kind: HashMap<String, Arc<JSONSchema>>,
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&String> = self.by_kind.keys().collect();
        kinds.sort();
        f.debug_struct("SchemaRegistry").field("kinds", &kinds).finish()
    }
}

impl SchemaRegistry {
    /// Compile the built-in project, component, task and metric schemas
    pub fn builtin() -> Result<Self, String> {
        let base = Arc::new(compile(&base_schema())?);
        let mut registry = Self {
            base,
            by_kind: HashMap::new(),
        };

        registry.register_family(
            &PROJECT_KINDS,
            json!({
                "type": "object",
                "required": ["project_id", "name"],
                "properties": {
                    "project_id": {"type": "string"},
                    "name": {"type": "string"},
                    "description": {"type": "string"},
                    "status": {"enum": ["active", "archived", "completed"]},
                    "owner_id": {"type": "string"},
                    "metadata": {"type": "object"}
                }
            }),
        )?;

        registry.register_family(
            &COMPONENT_KINDS,
            json!({
                "type": "object",
                "required": ["component_id", "project_id"],
                "properties": {
                    "component_id": {"type": "string"},
                    "project_id": {"type": "string"},
                    "name": {"type": "string"},
                    "type": {"type": "string"},
                    "status": {"enum": ["pending", "in_progress", "completed", "blocked"]},
                    "progress": {"type": "number", "minimum": 0, "maximum": 100},
                    "dependencies": {"type": "array", "items": {"type": "string"}},
                    "position": {
                        "type": "object",
                        "properties": {
                            "x": {"type": "number"},
                            "y": {"type": "number"}
                        }
                    }
                }
            }),
        )?;

        registry.register_family(
            &TASK_KINDS,
            json!({
                "type": "object",
                "required": ["task_id", "component_id"],
                "properties": {
                    "task_id": {"type": "string"},
                    "component_id": {"type": "string"},
                    "name": {"type": "string"},
                    "description": {"type": "string"},
                    "status": {"enum": ["todo", "in_progress", "review", "done"]},
                    "assignee_id": {"type": "string"}
                }
            }),
        )?;

        registry.register_family(
            &METRIC_KINDS,
            json!({
                "type": "object",
                "required": ["metric_name", "value"],
                "properties": {
                    "metric_name": {"type": "string"},
                    "value": {"type": "number"},
                    "labels": {"type": "object"}
                }
            }),
        )?;

        Ok(registry)
    }

    fn register_family(&mut self, kinds: &[&str], payload_schema: Value) -> Result<(), String> {
        let mut schema = base_schema();
        schema["properties"]["kind"] = json!({ "enum": kinds });
        schema["properties"]["payload"] = payload_schema;

        let compiled = Arc::new(compile(&schema)?);
        for kind in kinds {
            self.by_kind.insert(kind.to_string(), Arc::clone(&compiled));
        }
        Ok(())
    }

    pub fn knows(&self, kind: &str) -> bool {
        self.by_kind.contains_key(kind)
    }

    /// Validate an envelope against the schema registered for its kind
    pub fn check(&self, envelope: &InboundEnvelope) -> Result<(), FailureReason> {
        let schema = self
            .by_kind
            .get(envelope.kind.as_str())
            .unwrap_or(&self.base);

        if let Err(errors) = schema.validate(&envelope.document) {
            let msgs: Vec<String> = errors.map(|e| e.to_string()).collect();
            return Err(FailureReason::Schema(msgs.join("; ")));
        }
        Ok(())
    }
}

fn base_schema() -> Value {
    json!({
        "type": "object",
        "required": ["trace_id", "ts", "kind", "idempotency_key"],
        "properties": {
            "trace_id": {"type": "string"},
            "ts": {"type": "string"},
            "kind": {"type": "string"},
            "idempotency_key": {"type": "string"},
            "payload": {"type": "object"}
        },
        "additionalProperties": false
    })
}

fn compile(schema: &Value) -> Result<JSONSchema, String> {
    JSONSchema::compile(schema).map_err(|e| format!("Failed to compile schema: {}", e))
}
