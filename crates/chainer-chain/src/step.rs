//! The wire shape of one chain step.

use serde::{Deserialize, Serialize};

/// One step of an `mcp_chain` invocation.
///
/// `tool_args` is a raw string template; after sentinel substitution it must
/// parse as the JSON argument object for the downstream tool. The optional
/// JSONPaths filter the carry on the way in and the tool output on the way
/// out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStep {
    #[serde(rename = "toolName")]
    pub tool_name: String,

    #[serde(rename = "toolArgs")]
    pub tool_args: String,

    #[serde(default, rename = "inputPath", skip_serializing_if = "Option::is_none")]
    pub input_path: Option<String>,

    #[serde(default, rename = "outputPath", skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_minimal_step() {
        let json = r#"{"toolName": "fetch_fetch", "toolArgs": "{}"}"#;
        let step: ChainStep = serde_json::from_str(json).unwrap();
        assert_eq!(step.tool_name, "fetch_fetch");
        assert_eq!(step.tool_args, "{}");
        assert!(step.input_path.is_none());
        assert!(step.output_path.is_none());
    }

    #[test]
    fn deserialize_step_with_paths() {
        let json = r#"{
            "toolName": "xpath_xpath",
            "toolArgs": "{\"q\": \"//h1\"}",
            "inputPath": "$.count",
            "outputPath": "$.items[0].id"
        }"#;
        let step: ChainStep = serde_json::from_str(json).unwrap();
        assert_eq!(step.input_path.as_deref(), Some("$.count"));
        assert_eq!(step.output_path.as_deref(), Some("$.items[0].id"));
    }

    #[test]
    fn missing_tool_name_is_rejected() {
        let json = r#"{"toolArgs": "{}"}"#;
        assert!(serde_json::from_str::<ChainStep>(json).is_err());
    }

    #[test]
    fn missing_tool_args_is_rejected() {
        let json = r#"{"toolName": "echo"}"#;
        assert!(serde_json::from_str::<ChainStep>(json).is_err());
    }
}
