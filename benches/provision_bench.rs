//! Criterion benchmarks for hot paths in the nimbusd gateway.
//!
//! Run with:
//!   cargo bench
//!
//! Covers:
//!   - Project id derivation (regex pipeline + slug rules)
//!   - Setup module assembly and rendering
//!   - Wire parsing/serialization of gateway payloads (serde_json)

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;

use nimbusd::assembler::{assemble, registry, ClientConfig, SetupSelection};
use nimbusd::provision::{ProjectId, ProvisionReport, WorkflowState};

// ─── Fixtures ────────────────────────────────────────────────────────────────

fn sample_config() -> ClientConfig {
    let mut config = ClientConfig::new();
    config.insert("apiKey".into(), json!("AIza-bench-key"));
    config.insert("authDomain".into(), json!("bench.nimbusapp.dev"));
    config.insert("projectId".into(), json!("bench-project-17"));
    config.insert("storageBucket".into(), json!("bench-project-17.storage"));
    config.insert("messagingSenderId".into(), json!("420042004200"));
    config.insert("appId".into(), json!("1:420042004200:web:abc123"));
    config
}

/// Every feature on, every setting on — the widest module a wizard can ask for.
fn full_selection() -> SetupSelection {
    let features = registry::all_features()
        .iter()
        .map(|f| (f.name.to_string(), true));
    let settings = registry::all_features().iter().map(|f| {
        (
            f.name.to_string(),
            f.settings
                .iter()
                .map(|s| s.name.to_string())
                .collect::<Vec<_>>(),
        )
    });
    SetupSelection::new(features, settings)
}

fn minimal_selection() -> SetupSelection {
    SetupSelection::new([("Storage".to_string(), true)], [])
}

// ─── Project id derivation ───────────────────────────────────────────────────

fn bench_project_id(c: &mut Criterion) {
    c.bench_function("project_id_short_name", |b| {
        b.iter(|| {
            let id = ProjectId::derive(black_box("Crafty Fox"), black_box(1_700_000_000_123));
            black_box(id.unwrap());
        });
    });

    c.bench_function("project_id_long_name", |b| {
        b.iter(|| {
            let id = ProjectId::derive(
                black_box("Super Duper Mega Ultra Project"),
                black_box(1_700_000_000_123),
            );
            black_box(id.unwrap());
        });
    });
}

// ─── Module assembly ─────────────────────────────────────────────────────────

fn bench_assembly(c: &mut Criterion) {
    let config = sample_config();
    let minimal = minimal_selection();
    let full = full_selection();

    c.bench_function("assemble_render_minimal", |b| {
        b.iter(|| {
            let module = assemble(black_box(&minimal), black_box(&config)).unwrap();
            black_box(module.render());
        });
    });

    c.bench_function("assemble_render_full", |b| {
        b.iter(|| {
            let module = assemble(black_box(&full), black_box(&config)).unwrap();
            black_box(module.render());
        });
    });
}

// ─── Wire payloads ───────────────────────────────────────────────────────────

static SELECTION_JSON: &str = r#"{
    "features": {"Storage": true, "Authentication": true, "Analytics": false},
    "settings": {"Authentication": ["GitHub Auth", "Google Auth"]}
}"#;

fn bench_wire_payloads(c: &mut Criterion) {
    c.bench_function("parse_setup_selection", |b| {
        b.iter(|| {
            let selection: SetupSelection =
                serde_json::from_str(black_box(SELECTION_JSON)).unwrap();
            black_box(selection);
        });
    });

    c.bench_function("serialize_provision_report", |b| {
        let report = ProvisionReport {
            state: WorkflowState::Completed,
            project_id: ProjectId::derive("Crafty Fox", 1_700_000_000_123).unwrap(),
            client_id: Some("client-9".to_string()),
            client_config: Some(sample_config()),
            error: None,
        };
        b.iter(|| {
            let s = serde_json::to_string(black_box(&report)).unwrap();
            black_box(s);
        });
    });
}

// ─── Entry point ─────────────────────────────────────────────────────────────

criterion_group!(benches, bench_project_id, bench_assembly, bench_wire_payloads);
criterion_main!(benches);
