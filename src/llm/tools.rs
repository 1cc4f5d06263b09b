use std::fmt::Write as _;

use crate::errors::{WebClawError, WebClawResult};
use crate::llm::types::ToolDef;
use crate::tools::registry::ToolRegistry;

pub const SUBMIT_PLAN_TOOL: &str = "submit_plan";

const PLANNER_SYSTEM_TEMPLATE: &str = include_str!("../../prompts/planner_system.md");

/// Loads the `submit_plan` tool definition from prompts/tools/submit_plan.json.
/// The JSON is embedded at compile time via include_str!.
pub fn submit_plan_tool() -> WebClawResult<ToolDef> {
    let json = include_str!("../../prompts/tools/submit_plan.json");
    serde_json::from_str(json).map_err(|e| WebClawError::Config(format!("Failed to parse submit_plan tool: {e}")))
}

/// Renders the browser tool catalog as compact markdown for the planner.
pub fn tool_catalog_prompt(registry: &ToolRegistry) -> String {
    let mut out = String::new();
    for def in registry.definitions() {
        let _ = writeln!(out, "## {} ({:?})", def.name, def.category);
        let _ = writeln!(out, "{}", def.description);
        for p in &def.params {
            let mut line = format!("- `{}`: {}", p.name, p.param_type.as_str());
            if p.required {
                line.push_str(", required");
            }
            if let Some(values) = p.enum_values {
                let _ = write!(line, ", one of [{}]", values.join(", "));
            }
            if let Some(default) = &p.default {
                let _ = write!(line, ", default {default}");
            }
            let _ = write!(line, ". {}", p.description);
            let _ = writeln!(out, "{line}");
        }
        if let Some(example) = def.examples.first() {
            let _ = writeln!(out, "Example: `{example}`");
        }
        out.push('\n');
    }
    out
}

pub fn planner_system_prompt(registry: &ToolRegistry) -> String {
    PLANNER_SYSTEM_TEMPLATE.replace("{{tool_catalog}}", &tool_catalog_prompt(registry))
}
