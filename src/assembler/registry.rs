// SPDX-License-Identifier: MIT
//! Fixed feature registry for the generated setup module.
//!
//! Every emitted line of `nimbus.js` is declared here verbatim — import
//! symbols, init statements, per-setting statements and export symbols.
//! Nothing is derived from other strings at render time, so the rendered
//! output is byte-reproducible and the export list can never drift from the
//! initializations.

/// Always-present base app wiring; features hang off `app`.
pub const BASE_IMPORT: &str = r#"import { initializeApp } from "nimbus/app";"#;
pub const BASE_INIT: &str = "const app = initializeApp(nimbusConfig);";
pub const BASE_EXPORT: &str = "app";

/// Identifier of the embedded configuration literal.
pub const CONFIG_CONST: &str = "nimbusConfig";

/// An optional toggle under a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingEntry {
    pub name: &'static str,
    /// Statement appended after the owning feature's init line.
    pub line: &'static str,
    /// Extra symbol merged into the feature's import statement.
    pub import_symbol: Option<&'static str>,
    /// Extra symbol appended to the module's export list.
    pub export: Option<&'static str>,
}

/// One selectable platform feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureEntry {
    pub name: &'static str,
    /// SDK module the import statement pulls from.
    pub module: &'static str,
    /// Symbols always imported when the feature is selected.
    pub import_symbols: &'static [&'static str],
    pub init: &'static str,
    pub export: &'static str,
    pub settings: &'static [SettingEntry],
}

const FEATURES: &[FeatureEntry] = &[
    FeatureEntry {
        name: "Analytics",
        module: "nimbus/analytics",
        import_symbols: &["getAnalytics"],
        init: "const analytics = getAnalytics(app);",
        export: "analytics",
        settings: &[
            SettingEntry {
                name: "Enable Debug Mode",
                line: "analytics.setAnalyticsCollectionEnabled(true);",
                import_symbol: None,
                export: None,
            },
            SettingEntry {
                name: "Set Reporting Threshold",
                line: "analytics.setReportMode(2);",
                import_symbol: None,
                export: None,
            },
        ],
    },
    FeatureEntry {
        name: "Authentication",
        module: "nimbus/auth",
        import_symbols: &["getAuth"],
        init: "const auth = getAuth(app);",
        export: "auth",
        settings: &[
            SettingEntry {
                name: "Apple Auth",
                line: r#"const appleProvider = new OAuthProvider("apple.com");"#,
                import_symbol: Some("OAuthProvider"),
                export: Some("appleProvider"),
            },
            SettingEntry {
                name: "Facebook Auth",
                line: "const facebookProvider = new FacebookAuthProvider();",
                import_symbol: Some("FacebookAuthProvider"),
                export: Some("facebookProvider"),
            },
            SettingEntry {
                name: "GitHub Auth",
                line: "const githubProvider = new GithubAuthProvider();",
                import_symbol: Some("GithubAuthProvider"),
                export: Some("githubProvider"),
            },
            SettingEntry {
                name: "Google Auth",
                line: "const googleProvider = new GoogleAuthProvider();",
                import_symbol: Some("GoogleAuthProvider"),
                export: Some("googleProvider"),
            },
        ],
    },
    FeatureEntry {
        name: "Performance Monitoring",
        module: "nimbus/performance",
        import_symbols: &["getPerformance"],
        init: "const performance = getPerformance(app);",
        export: "performance",
        settings: &[],
    },
    FeatureEntry {
        name: "Remote Config",
        module: "nimbus/remote-config",
        import_symbols: &["getRemoteConfig"],
        init: "const remoteConfig = getRemoteConfig(app);",
        export: "remoteConfig",
        settings: &[SettingEntry {
            name: "Set Config Parameters",
            line: "remoteConfig.settings = { minimumFetchIntervalMillis: 3600000 };",
            import_symbol: None,
            export: None,
        }],
    },
    FeatureEntry {
        name: "Document Database",
        module: "nimbus/docstore",
        import_symbols: &["getDocstore"],
        init: "const docstore = getDocstore(app);",
        export: "docstore",
        settings: &[SettingEntry {
            name: "Enable Offline Persistence",
            line: "docstore.enablePersistence();",
            import_symbol: None,
            export: None,
        }],
    },
    FeatureEntry {
        name: "Functions",
        module: "nimbus/functions",
        import_symbols: &["getFunctions"],
        init: "const functions = getFunctions(app);",
        export: "functions",
        settings: &[SettingEntry {
            name: "Enable Regions",
            line: r#"functions.setRegion("us-central1");"#,
            import_symbol: None,
            export: None,
        }],
    },
    FeatureEntry {
        name: "Messaging",
        module: "nimbus/messaging",
        import_symbols: &["getMessaging"],
        init: "const messaging = getMessaging(app);",
        export: "messaging",
        settings: &[],
    },
    FeatureEntry {
        name: "Realtime Database",
        module: "nimbus/database",
        import_symbols: &["getDatabase"],
        init: "const database = getDatabase(app);",
        export: "database",
        settings: &[SettingEntry {
            name: "Enable Offline Mode",
            line: "database.goOffline();",
            import_symbol: None,
            export: None,
        }],
    },
    FeatureEntry {
        name: "Storage",
        module: "nimbus/storage",
        import_symbols: &["getStorage"],
        init: "const storage = getStorage(app);",
        export: "storage",
        settings: &[SettingEntry {
            name: "Enable File Versioning",
            line: "storage.enableVersioning();",
            import_symbol: None,
            export: None,
        }],
    },
];

/// All features in declaration order — the order lines are emitted in.
pub fn all_features() -> &'static [FeatureEntry] {
    FEATURES
}

/// Find a feature by its user-facing name.
pub fn find_feature(name: &str) -> Option<&'static FeatureEntry> {
    FEATURES.iter().find(|f| f.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_has_nine_features() {
        assert_eq!(all_features().len(), 9);
    }

    #[test]
    fn find_feature_matches_exact_names() {
        let storage = find_feature("Storage").expect("Storage should exist");
        assert_eq!(storage.module, "nimbus/storage");
        assert_eq!(storage.settings[0].name, "Enable File Versioning");
        assert!(find_feature("storage").is_none());
        assert!(find_feature("Blockchain").is_none());
    }

    #[test]
    fn every_feature_is_fully_declared() {
        for feature in all_features() {
            assert!(
                !feature.import_symbols.is_empty(),
                "feature '{}' imports nothing",
                feature.name
            );
            assert!(
                feature.init.ends_with(';'),
                "feature '{}' init is not a statement",
                feature.name
            );
            assert!(!feature.export.is_empty());
            for setting in feature.settings {
                assert!(
                    setting.line.ends_with(';'),
                    "setting '{}' line is not a statement",
                    setting.name
                );
            }
        }
    }

    #[test]
    fn auth_providers_declare_import_and_export_symbols() {
        let auth = find_feature("Authentication").unwrap();
        assert_eq!(auth.settings.len(), 4);
        for setting in auth.settings {
            assert!(setting.import_symbol.is_some(), "{} has no import", setting.name);
            assert!(setting.export.is_some(), "{} has no export", setting.name);
        }
    }
}
