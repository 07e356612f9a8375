//! Container run request handed over by the orchestration client.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::CoreError;

/// How the orchestration client wants the workspace container to be run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunOptions {
    /// Container image.
    pub image: String,

    /// User to run the container as (empty = image default).
    pub user: String,

    /// Entrypoint override.
    pub entrypoint: String,

    /// Arguments passed to the entrypoint.
    pub cmd: Vec<String>,

    /// Environment variables.
    pub env: HashMap<String, String>,

    /// Container labels as `key=value` pairs.
    pub labels: Vec<String>,

    /// Extra volume mounts.
    pub mounts: Vec<Mount>,

    /// Run the container privileged.
    pub privileged: Option<bool>,

    /// Docker security options.
    pub security_opt: Vec<String>,
}

/// A volume mount requested for the container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Mount {
    /// Mount type (`volume`, `bind`, ...).
    #[serde(rename = "type")]
    pub kind: String,

    /// Source path or volume name.
    pub source: String,

    /// Target path inside the container.
    pub target: String,
}

impl RunOptions {
    /// Parse the JSON document passed by the orchestration client.
    pub fn from_json(raw: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Labels as a map. Entries without `=` map to an empty value.
    pub fn labels_map(&self) -> HashMap<String, String> {
        self.labels
            .iter()
            .map(|label| match label.split_once('=') {
                Some((key, value)) => (key.to_string(), value.to_string()),
                None => (label.clone(), String::new()),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_with_defaults() {
        let options = RunOptions::from_json(
            r#"{"image":"alpine","cmd":["-c","sleep 10"],"labels":["a=b","flag"],"securityOpt":["seccomp=unconfined"]}"#,
        )
        .unwrap();

        assert_eq!(options.image, "alpine");
        assert_eq!(options.cmd, vec!["-c", "sleep 10"]);
        assert!(options.env.is_empty());
        assert_eq!(options.security_opt, vec!["seccomp=unconfined"]);

        let labels = options.labels_map();
        assert_eq!(labels["a"], "b");
        assert_eq!(labels["flag"], "");
    }

    #[test]
    fn test_from_json_invalid() {
        assert!(matches!(
            RunOptions::from_json("not json"),
            Err(CoreError::Serialization(_))
        ));
    }

    #[test]
    fn test_mount_type_field() {
        let options =
            RunOptions::from_json(r#"{"mounts":[{"type":"bind","source":"/src","target":"/dst"}]}"#)
                .unwrap();
        assert_eq!(options.mounts[0].kind, "bind");
        assert_eq!(options.mounts[0].target, "/dst");
    }
}
