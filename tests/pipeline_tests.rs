//! Compilation: transformer + validator + artifact packaging.

mod common;

use chrono::Utc;
use common::*;
use pagestack_core::{
    CompilationPipeline, CompileContext, DocumentSet, ManifestEntry, PageKind, PipelineError,
    ReasonCode,
};
use serde_json::json;
use std::path::PathBuf;

fn rejected_codes(result: Result<pagestack_core::CompiledArtifact, PipelineError>) -> Vec<ReasonCode> {
    match result {
        Ok(_) => panic!("expected rejection"),
        Err(e) => e.compile_errors().expect("compile errors").codes(),
    }
}

fn prior_entry(checksum: &str, version: &str) -> ManifestEntry {
    ManifestEntry {
        id: "prior".into(),
        layer_key: pagestack_core::LayerKey::blueprint("portal", "/home"),
        artifact_ref: checksum.into(),
        checksum: checksum.into(),
        schema_version: "1.0.0".into(),
        content_version: version.into(),
        compiled_at: Utc::now(),
        published_at: Utc::now(),
    }
}

#[test]
fn test_reports_every_error_in_one_pass() {
    let doc = blueprint_doc("1.0.0").child(
        node("region").attr("id", "aside").child(
            component("broken", "Stat")
                .child(node("prop").attr("name", "a").attr("contract", "stats.missing"))
                .child(node("prop").attr("name", "b").attr("action", "nope"))
                .child(node("prop").attr("name", "c").attr("expr", "unknown + 1")),
        ),
    );
    let codes = rejected_codes(CompilationPipeline::new().compile(&doc, &CompileContext::new()));
    assert!(codes.contains(&ReasonCode::UnknownContractField));
    assert!(codes.contains(&ReasonCode::UnknownAction));
    assert!(codes.contains(&ReasonCode::UnknownIdentifier));
}

#[test]
fn test_duplicate_component_ids_rejected() {
    let doc = blueprint_doc("1.0.0").child(
        node("region")
            .attr("id", "aside")
            .child(component("hero", "Banner").child(static_prop("title", "Again"))),
    );
    let codes = rejected_codes(CompilationPipeline::new().compile(&doc, &CompileContext::new()));
    assert_eq!(codes, vec![ReasonCode::DuplicateId]);
}

#[test]
fn test_blueprint_with_scope_rejected() {
    let doc = blueprint_doc("1.0.0").attr("tenant", "acme");
    let codes = rejected_codes(CompilationPipeline::new().compile(&doc, &CompileContext::new()));
    assert!(codes.contains(&ReasonCode::UnexpectedScope));
}

#[test]
fn test_overlay_without_scope_rejected() {
    let base = compile_blueprint(&blueprint_doc("1.0.0"));
    let doc = retitle_hero_doc(&[], "Hi");
    let codes = rejected_codes(
        CompilationPipeline::new().compile(&doc, &CompileContext::new().with_base(&base.ir)),
    );
    assert_eq!(codes, vec![ReasonCode::MissingScope]);
}

#[test]
fn test_overlay_for_other_blueprint_rejected() {
    let base = compile_blueprint(&blueprint_doc("1.0.0"));
    let doc = retitle_hero_doc(&[("tenant", "acme")], "Hi").attr("route", "/other");
    let codes = rejected_codes(
        CompilationPipeline::new().compile(&doc, &CompileContext::new().with_base(&base.ir)),
    );
    assert!(codes.contains(&ReasonCode::BlueprintMismatch));
}

#[test]
fn test_overlay_may_target_ids_from_earlier_overlays() {
    let base = compile_blueprint(&blueprint_doc("1.0.0"));
    let adds_banner = overlay_root(&[("tenant", "acme")], "1.0.0").child(
        node("patch").attr("target", "region").attr("id", "main").attr("op", "merge").child(
            node("region").child(component("banner", "Banner").child(static_prop("text", "Sale"))),
        ),
    );
    let first = compile_overlay(&adds_banner, &base.ir);

    let retitles_banner = overlay_root(&[("tenant", "acme"), ("role", "staff")], "1.0.0").child(
        node("patch")
            .attr("target", "component")
            .attr("id", "banner")
            .attr("op", "merge")
            .child(node("component").child(static_prop("text", "Staff sale"))),
    );
    let pipeline = CompilationPipeline::new();

    let alone = pipeline.compile(&retitles_banner, &CompileContext::new().with_base(&base.ir));
    assert_eq!(rejected_codes(alone), vec![ReasonCode::MissingOverlayTarget]);

    let additional = [first.ir.clone()];
    let ctx = CompileContext::new().with_base(&base.ir).with_additional(&additional);
    assert!(pipeline.compile(&retitles_banner, &ctx).is_ok());
}

#[test]
fn test_new_component_must_be_complete() {
    let base = compile_blueprint(&blueprint_doc("1.0.0"));
    let doc = overlay_root(&[("tenant", "acme")], "1.0.0").child(
        node("patch").attr("target", "region").attr("id", "main").attr("op", "merge").child(
            // no type or namespace
            node("region").child(node("component").attr("id", "ghost").child(static_prop("x", 1))),
        ),
    );
    let codes = rejected_codes(
        CompilationPipeline::new().compile(&doc, &CompileContext::new().with_base(&base.ir)),
    );
    assert_eq!(codes, vec![ReasonCode::IncompletePatch]);
}

#[test]
fn test_same_version_different_content_rejected() {
    let published = compile_blueprint(&blueprint_doc("1.0.0"));
    let prior = prior_entry(&published.checksum, "1.0.0");
    let pipeline = CompilationPipeline::new();

    // identical content: fine
    assert!(pipeline
        .compile(&blueprint_doc("1.0.0"), &CompileContext::new().with_prior(Some(&prior)))
        .is_ok());

    let edited = blueprint_doc("1.0.0").child(node("constant").attr("name", "extra").attr("value", 1));
    let codes = rejected_codes(pipeline.compile(&edited, &CompileContext::new().with_prior(Some(&prior))));
    assert_eq!(codes, vec![ReasonCode::VersionNotBumped]);
}

#[test]
fn test_version_regression_rejected() {
    let prior = prior_entry("abc", "2.0.0");
    let codes = rejected_codes(
        CompilationPipeline::new()
            .compile(&blueprint_doc("1.9.0"), &CompileContext::new().with_prior(Some(&prior))),
    );
    assert_eq!(codes, vec![ReasonCode::VersionRegression]);
}

#[test]
fn test_access_directive_checks() {
    let doc = blueprint_doc("1.0.0").child(
        node("region")
            .attr("id", "aside")
            .child(component("empty", "Panel").attr("allow", json!([])))
            .child(
                component("both", "Panel")
                    .attr("allow", json!(["staff"]))
                    .attr("deny", json!(["staff"])),
            ),
    );
    let codes = rejected_codes(CompilationPipeline::new().compile(&doc, &CompileContext::new()));
    assert!(codes.contains(&ReasonCode::EmptyRoleList));
    assert!(codes.contains(&ReasonCode::AmbiguousRole));
}

#[test]
fn test_static_path_binding_checked_against_data() {
    let good = blueprint_doc("1.0.0").child(
        node("region").attr("id", "aside").child(
            component("who", "Text")
                .child(node("prop").attr("name", "n").attr("source", "profile").attr("path", "user.name")),
        ),
    );
    assert!(CompilationPipeline::new().compile(&good, &CompileContext::new()).is_ok());

    let bad = blueprint_doc("1.0.0").child(
        node("region").attr("id", "aside").child(
            component("who", "Text")
                .child(node("prop").attr("name", "n").attr("source", "profile").attr("path", "user.age")),
        ),
    );
    let codes = rejected_codes(CompilationPipeline::new().compile(&bad, &CompileContext::new()));
    assert_eq!(codes, vec![ReasonCode::UnresolvedPath]);
}

#[test]
fn test_transform_errors_carry_node_ids() {
    let doc = blueprint_doc("1.0.0").child(
        node("region").attr("id", "aside").child(
            component("odd", "Text").child(node("prop").attr("name", "x").attr("kind", "magic")),
        ),
    );
    let err = CompilationPipeline::new()
        .compile(&doc, &CompileContext::new())
        .unwrap_err();
    let errors = err.compile_errors().unwrap();
    let first = errors.iter().next().unwrap();
    assert_eq!(first.code, ReasonCode::UnknownKind);
    assert_eq!(first.node_id.as_deref(), Some("odd.x"));
}

#[test]
fn test_unused_source_is_only_a_warning() {
    let doc = blueprint_doc("1.0.0").child(
        node("dataSource").attr("id", "spare").attr("kind", "static").attr("data", json!({})),
    );
    let pipeline = CompilationPipeline::new();
    let (_, result) = pipeline.validate_document(&doc, &CompileContext::new()).unwrap();
    assert!(result.valid);
    assert_eq!(result.warnings().count(), 1);
    assert!(pipeline.compile(&doc, &CompileContext::new()).is_ok());
}

#[test]
fn test_deeply_chained_expression_is_rejected() {
    let source = format!("1{}", "+1".repeat(50_000));
    let doc = blueprint_doc("1.0.0").child(
        node("region").attr("id", "aside").child(
            component("sum", "Stat").child(node("prop").attr("name", "total").attr("expr", source)),
        ),
    );
    let result = CompilationPipeline::new().compile(&doc, &CompileContext::new());
    assert_eq!(rejected_codes(result), vec![ReasonCode::InvalidExpression]);
}

#[test]
fn test_compile_set_compiles_overlays_against_their_blueprint() {
    let mut set = DocumentSet::new();
    set.push(PathBuf::from("a-acme.json"), acme_overlay_doc("Welcome, Acme", "1.0.0"));
    set.push(PathBuf::from("b-home.json"), blueprint_doc("1.0.0"));

    let artifacts = CompilationPipeline::new().compile_set(&set).unwrap();
    assert_eq!(artifacts.len(), 2);
    assert_eq!(artifacts[0].ir.kind, PageKind::Blueprint);
    assert_eq!(artifacts[1].ir.kind, PageKind::Overlay);
    assert_eq!(artifacts[1].ir.scope.tenant.as_deref(), Some("acme"));
}

#[test]
fn test_compile_set_names_the_rejected_document() {
    let mut set = DocumentSet::new();
    set.push(PathBuf::from("home.json"), blueprint_doc("1.0.0"));
    set.push(
        PathBuf::from("stray.json"),
        retitle_hero_doc(&[("tenant", "acme")], "x").attr("extends", "landing"),
    );

    let err = CompilationPipeline::new().compile_set(&set).unwrap_err();
    assert_eq!(err.path, PathBuf::from("stray.json"));
    assert!(err.source.compile_errors().unwrap().has(ReasonCode::MissingBlueprint));
}
