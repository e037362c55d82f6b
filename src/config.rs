// src/config.rs

use serde::{Deserialize, Serialize};

pub const DEFAULT_ANNOTATION_PACKAGE: &str = "me/zhanghai/android/bytecoder/library";
pub const DEFAULT_LINK_FAILURE_CLASS: &str = "java/lang/LinkageError";

/// Settings for a [`crate::Transformer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Package holding the marker annotations, dotted or slashed.
    pub annotation_package: String,
    /// Checked failure every stub has to declare.
    pub link_failure_class: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            annotation_package: DEFAULT_ANNOTATION_PACKAGE.to_string(),
            link_failure_class: DEFAULT_LINK_FAILURE_CLASS.to_string(),
        }
    }
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Descriptor of a marker annotation, e.g. `Lpkg/GetField;`.
    pub fn marker_descriptor(&self, simple_name: &str) -> String {
        let package = self.annotation_package.trim_matches(|c| c == '/' || c == '.');
        if package.is_empty() {
            format!("L{simple_name};")
        } else {
            format!("L{}/{simple_name};", package.replace('.', "/"))
        }
    }

    /// Internal name of the required failure class.
    pub fn link_failure_internal_name(&self) -> String {
        self.link_failure_class.replace('.', "/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_marker_descriptor() {
        let config = Config::default();
        assert_eq!(
            config.marker_descriptor("GetField"),
            "Lme/zhanghai/android/bytecoder/library/GetField;"
        );
    }

    #[test]
    fn dotted_package_from_json() {
        let config =
            Config::from_json(r#"{ "annotation_package": "com.example.stubs." }"#).unwrap();
        assert_eq!(
            config.marker_descriptor("InvokeStatic"),
            "Lcom/example/stubs/InvokeStatic;"
        );
        assert_eq!(config.link_failure_internal_name(), DEFAULT_LINK_FAILURE_CLASS);
    }
}
