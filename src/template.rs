use std::collections::HashMap;
use std::path::PathBuf;

use handlebars::Handlebars;
use serde::Serialize;

use crate::error::{AutobenchError, Result};

/// The names of templates in the closed template set (spec §4.5/§9: "the
/// template set is closed").
pub const CONSTANT_ARRIVAL_RATE: &str = "constant_arrival_rate";

const CONSTANT_ARRIVAL_RATE_TEMPLATE: &str = r#"
import http from "k6/http";
import { sse } from "k6/x/sse";

export const options = {
  scenarios: {
    constant_arrival_rate: {
      executor: "constant-arrival-rate",
      rate: {{rate}},
      timeUnit: "1s",
      duration: "{{duration}}",
      preAllocatedVUs: {{pre_allocated_vus}},
    },
  },
};

const HOST = "{{host}}";
const DATA_FILE = "{{data_file}}";
{{#if max_new_tokens}}
const MAX_NEW_TOKENS = {{max_new_tokens}};
{{/if}}

export default function () {
  sse.open(`${HOST}/generate_stream`, {
    method: "POST",
    body: JSON.stringify({ inputs: DATA_FILE }),
  });
}
"#;

/// Variables rendered into the `constant_arrival_rate` template.
#[derive(Debug, Clone, Serialize)]
pub struct ScriptVariables {
    pub host: String,
    pub data_file: String,
    pub pre_allocated_vus: u32,
    pub rate: u32,
    pub duration: String,
    pub max_new_tokens: Option<u32>,
}

/// Renders templated load-generator scripts from a parameter set (component
/// C6). The template set is a closed sum of known executor kinds, registered
/// once at construction time.
pub struct ScriptRenderer {
    handlebars: Handlebars<'static>,
}

impl ScriptRenderer {
    pub fn new() -> Result<Self> {
        let mut handlebars = Handlebars::new();
        handlebars
            .register_template_string(CONSTANT_ARRIVAL_RATE, CONSTANT_ARRIVAL_RATE_TEMPLATE)
            .map_err(|e| AutobenchError::TemplateError(format!("invalid template: {e}")))?;
        Ok(Self { handlebars })
    }

    /// Render `template_name` with `variables`, writing the result to a
    /// unique file under the system temp directory, and return its path.
    pub fn render(&self, template_name: &str, variables: &ScriptVariables) -> Result<PathBuf> {
        let rendered = self
            .handlebars
            .render(template_name, variables)
            .map_err(|e| AutobenchError::TemplateError(format!("failed to render {template_name}: {e}")))?;

        let file_name = format!("autobench_{}_k6_script.js", uuid::Uuid::new_v4());
        let path = std::env::temp_dir().join(file_name);
        std::fs::write(&path, &rendered)
            .map_err(|e| AutobenchError::TemplateError(format!("failed to write rendered script: {e}")))?;

        Ok(path)
    }
}

impl Default for ScriptRenderer {
    fn default() -> Self {
        Self::new().expect("built-in templates are always valid")
    }
}

/// Converts executor variables into a serializable map for result
/// persistence, matching the original system's free-form `variables` dict.
pub fn variables_to_map(variables: &ScriptVariables) -> HashMap<String, serde_json::Value> {
    serde_json::to_value(variables)
        .ok()
        .and_then(|v| v.as_object().cloned())
        .map(|obj| obj.into_iter().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_constant_arrival_rate_to_a_readable_file() {
        let renderer = ScriptRenderer::new().unwrap();
        let vars = ScriptVariables {
            host: "https://example.endpoints.huggingface.cloud".to_string(),
            data_file: "/tmp/data.json".to_string(),
            pre_allocated_vus: 10,
            rate: 5,
            duration: "30s".to_string(),
            max_new_tokens: Some(128),
        };
        let path = renderer.render(CONSTANT_ARRIVAL_RATE, &vars).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("https://example.endpoints.huggingface.cloud"));
        assert!(contents.contains("rate: 5"));
        assert!(contents.contains("MAX_NEW_TOKENS = 128"));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn unknown_template_name_errors() {
        let renderer = ScriptRenderer::new().unwrap();
        let vars = ScriptVariables {
            host: "h".to_string(),
            data_file: "d".to_string(),
            pre_allocated_vus: 1,
            rate: 1,
            duration: "1s".to_string(),
            max_new_tokens: None,
        };
        assert!(renderer.render("does_not_exist", &vars).is_err());
    }
}
