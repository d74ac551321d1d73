// SPDX-License-Identifier: MIT
//! Config/code assembly — selection matrix + client config → `nimbus.js`.
//!
//! A pure fold over the fixed [`registry`]: no accumulator state survives
//! between calls, so concurrent renders can never bleed lines into each
//! other. Identical inputs produce byte-identical output; the configuration
//! literal serializes with sorted keys, which keeps re-renders stable.

pub mod registry;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Opaque configuration object fetched from the platform API; embedded in
/// the generated module verbatim.
pub type ClientConfig = serde_json::Map<String, Value>;

/// Name of the emitted artifact.
pub const MODULE_FILENAME: &str = "nimbus.js";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssembleError {
    #[error("client configuration is missing or empty")]
    MissingConfig,
}

// ─── Selection ────────────────────────────────────────────────────────────────

/// Wire shape of a selection, as the wizard posts it.
#[derive(Debug, Default, Deserialize)]
struct SelectionInput {
    #[serde(default)]
    features: HashMap<String, bool>,
    #[serde(default)]
    settings: HashMap<String, Vec<String>>,
}

/// Validated feature/setting choice matrix.
///
/// Containment is enforced at construction: a setting whose owning feature
/// is disabled is dropped here, so render never has to re-check. Unknown
/// feature names are kept and simply never match the registry.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "SelectionInput")]
pub struct SetupSelection {
    enabled: BTreeSet<String>,
    settings: BTreeMap<String, BTreeSet<String>>,
}

impl SetupSelection {
    pub fn new(
        features: impl IntoIterator<Item = (String, bool)>,
        settings: impl IntoIterator<Item = (String, Vec<String>)>,
    ) -> Self {
        let enabled: BTreeSet<String> = features
            .into_iter()
            .filter(|(_, on)| *on)
            .map(|(name, _)| name)
            .collect();
        let settings = settings
            .into_iter()
            .filter(|(feature, _)| enabled.contains(feature))
            .map(|(feature, names)| (feature, names.into_iter().collect()))
            .collect();
        Self { enabled, settings }
    }

    pub fn is_enabled(&self, feature: &str) -> bool {
        self.enabled.contains(feature)
    }

    pub fn setting_on(&self, feature: &str, setting: &str) -> bool {
        self.settings
            .get(feature)
            .is_some_and(|names| names.contains(setting))
    }

    pub fn enabled_features(&self) -> impl Iterator<Item = &str> {
        self.enabled.iter().map(String::as_str)
    }
}

impl From<SelectionInput> for SetupSelection {
    fn from(input: SelectionInput) -> Self {
        Self::new(input.features, input.settings)
    }
}

// ─── Assembly ─────────────────────────────────────────────────────────────────

/// Ordered line lists plus the embedded configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedModule {
    pub imports: Vec<String>,
    pub initializations: Vec<String>,
    pub exports: Vec<String>,
    pub config: ClientConfig,
}

/// Fold the selection over the registry into a [`GeneratedModule`].
///
/// Emission order is fixed: the base app lines first, then each selected
/// feature in registry order — import statement (base symbols plus selected
/// settings' symbols), init line, then the selected settings' lines in
/// declaration order. An empty config is a precondition violation; a module
/// with a placeholder literal would be worse than no module.
pub fn assemble(
    selection: &SetupSelection,
    config: &ClientConfig,
) -> Result<GeneratedModule, AssembleError> {
    if config.is_empty() {
        return Err(AssembleError::MissingConfig);
    }

    let mut imports = vec![registry::BASE_IMPORT.to_string()];
    let mut initializations = vec![registry::BASE_INIT.to_string()];
    let mut exports = vec![registry::BASE_EXPORT.to_string()];

    for feature in registry::all_features() {
        if !selection.is_enabled(feature.name) {
            continue;
        }

        let mut symbols: Vec<&str> = feature.import_symbols.to_vec();
        for setting in feature.settings {
            if selection.setting_on(feature.name, setting.name) {
                if let Some(symbol) = setting.import_symbol {
                    symbols.push(symbol);
                }
            }
        }
        imports.push(format!(
            r#"import {{ {} }} from "{}";"#,
            symbols.join(", "),
            feature.module
        ));

        initializations.push(feature.init.to_string());
        exports.push(feature.export.to_string());

        for setting in feature.settings {
            if selection.setting_on(feature.name, setting.name) {
                initializations.push(setting.line.to_string());
                if let Some(symbol) = setting.export {
                    exports.push(symbol.to_string());
                }
            }
        }
    }

    Ok(GeneratedModule {
        imports,
        initializations,
        exports,
        config: config.clone(),
    })
}

impl GeneratedModule {
    /// Render the module source. Byte-stable for a fixed module.
    pub fn render(&self) -> String {
        let config_json =
            serde_json::to_string_pretty(&self.config).unwrap_or_else(|_| "{}".to_string());

        let mut out = String::new();
        out.push_str("// Imports\n");
        for line in &self.imports {
            out.push_str(line);
            out.push('\n');
        }

        out.push_str("\n// Client configuration\n");
        out.push_str(&format!("const {} = {};\n", registry::CONFIG_CONST, config_json));

        out.push_str("\n// Initializations\n");
        for line in &self.initializations {
            out.push_str(line);
            out.push('\n');
        }

        out.push_str("\n// Exports\n");
        out.push_str(&format!("export {{ {} }};\n", self.exports.join(", ")));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config_with_key() -> ClientConfig {
        let mut config = ClientConfig::new();
        config.insert("apiKey".into(), json!("x"));
        config
    }

    fn select(features: &[&str], settings: &[(&str, &[&str])]) -> SetupSelection {
        SetupSelection::new(
            features.iter().map(|f| (f.to_string(), true)),
            settings
                .iter()
                .map(|(f, names)| (f.to_string(), names.iter().map(|s| s.to_string()).collect())),
        )
    }

    #[test]
    fn storage_selection_emits_its_lines_in_order() {
        let selection = select(&["Storage"], &[("Storage", &["Enable File Versioning"])]);
        let module = assemble(&selection, &config_with_key()).unwrap();
        let rendered = module.render();

        let import_at = rendered
            .find(r#"import { getStorage } from "nimbus/storage";"#)
            .expect("storage import missing");
        let init_at = rendered
            .find("const storage = getStorage(app);")
            .expect("storage init missing");
        let setting_at = rendered
            .find("storage.enableVersioning();")
            .expect("versioning line missing");
        assert!(import_at < init_at && init_at < setting_at);

        assert!(rendered.contains("export { app, storage };"));

        // Nothing from unselected features leaks in.
        assert!(!rendered.contains("getAuth"));
        assert!(!rendered.contains("analytics"));
        assert!(!rendered.contains("getMessaging"));
    }

    #[test]
    fn auth_settings_extend_import_and_export_lists() {
        let selection = select(
            &["Authentication"],
            &[("Authentication", &["GitHub Auth", "Google Auth"])],
        );
        let module = assemble(&selection, &config_with_key()).unwrap();

        assert_eq!(
            module.imports[1],
            r#"import { getAuth, GithubAuthProvider, GoogleAuthProvider } from "nimbus/auth";"#
        );
        assert_eq!(
            module.initializations,
            vec![
                "const app = initializeApp(nimbusConfig);",
                "const auth = getAuth(app);",
                "const githubProvider = new GithubAuthProvider();",
                "const googleProvider = new GoogleAuthProvider();",
            ]
        );
        assert_eq!(module.exports, vec!["app", "auth", "githubProvider", "googleProvider"]);
    }

    #[test]
    fn rendering_is_byte_identical_across_calls() {
        let selection = select(
            &["Analytics", "Storage"],
            &[("Analytics", &["Enable Debug Mode"])],
        );
        let config = config_with_key();

        let first = assemble(&selection, &config).unwrap().render();
        let second = assemble(&selection, &config).unwrap().render();
        assert_eq!(first, second);
    }

    #[test]
    fn config_literal_uses_sorted_keys() {
        let mut config = ClientConfig::new();
        config.insert("zone".into(), json!("z"));
        config.insert("apiKey".into(), json!("x"));
        let rendered = assemble(&SetupSelection::default(), &config)
            .unwrap()
            .render();

        let api_at = rendered.find(r#""apiKey": "x""#).expect("apiKey missing");
        let zone_at = rendered.find(r#""zone": "z""#).expect("zone missing");
        assert!(api_at < zone_at);
        assert!(rendered.contains("const nimbusConfig = {"));
    }

    #[test]
    fn empty_config_fails_fast() {
        let selection = select(&["Storage"], &[]);
        assert_eq!(
            assemble(&selection, &ClientConfig::new()),
            Err(AssembleError::MissingConfig)
        );
    }

    #[test]
    fn unknown_features_are_ignored() {
        let selection = select(&["Blockchain"], &[("Blockchain", &["Sharding"])]);
        let module = assemble(&selection, &config_with_key()).unwrap();
        assert_eq!(module.imports, vec![registry::BASE_IMPORT.to_string()]);
        assert_eq!(module.exports, vec!["app"]);
    }

    #[test]
    fn settings_without_their_feature_are_dropped_at_construction() {
        let selection = SetupSelection::new(
            [("Analytics".to_string(), false)],
            [("Analytics".to_string(), vec!["Enable Debug Mode".to_string()])],
        );
        assert!(!selection.is_enabled("Analytics"));
        assert!(!selection.setting_on("Analytics", "Enable Debug Mode"));

        let rendered = assemble(&selection, &config_with_key()).unwrap().render();
        assert!(!rendered.contains("setAnalyticsCollectionEnabled"));
    }

    #[test]
    fn selection_deserializes_from_wire_shape() {
        let selection: SetupSelection = serde_json::from_value(json!({
            "features": {"Storage": true, "Messaging": false},
            "settings": {"Storage": ["Enable File Versioning"]}
        }))
        .unwrap();
        assert!(selection.is_enabled("Storage"));
        assert!(!selection.is_enabled("Messaging"));
        assert!(selection.setting_on("Storage", "Enable File Versioning"));
    }
}
