//! Property tests for binding soundness, layer ordering and merge purity.

mod common;

use common::*;
use pagestack_core::ir::{LayerKey, PageKind, PropValue};
use pagestack_core::registry::precedence;
use pagestack_core::resolver::LayerInput;
use pagestack_core::{
    CompilationPipeline, CompileContext, CompiledArtifact, MemoryStore, Publisher, ReasonCode,
    Registry, RequestContext, ResolvedPage, Resolver,
};
use proptest::prelude::*;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;

const SOURCES: &[&str] = &["alpha", "beta", "gamma"];
const FIELDS: &[&str] = &["x", "y"];

/// (source, field) pairs a generated page binds to.
fn bindings() -> impl Strategy<Value = Vec<(usize, usize)>> {
    prop::collection::vec((0..SOURCES.len() + 1, 0..FIELDS.len() + 1), 1..6)
}

fn source_name(i: usize) -> &'static str {
    SOURCES.get(i).copied().unwrap_or("ghost")
}

fn field_name(i: usize) -> &'static str {
    FIELDS.get(i).copied().unwrap_or("z")
}

fn overlay_key(tenant: bool, role: bool, variant: bool, locale: bool) -> LayerKey {
    LayerKey {
        kind: PageKind::Overlay,
        module: "portal".into(),
        route: "/home".into(),
        tenant: tenant.then(|| "acme".to_string()),
        role: role.then(|| "admin".to_string()),
        variant: variant.then(|| "b".to_string()),
        locale: locale.then(|| "de-DE".to_string()),
    }
}

fn all_scopes() -> Vec<LayerKey> {
    (1u8..16)
        .map(|bits| overlay_key(bits & 1 != 0, bits & 2 != 0, bits & 4 != 0, bits & 8 != 0))
        .collect()
}

/// Publish in the given order, then resolve for a viewer holding every role.
fn resolve_published(blueprint: &CompiledArtifact, overlays: &[&CompiledArtifact]) -> ResolvedPage {
    let store = Arc::new(MemoryStore::new());
    let publisher = Publisher::new(store.clone());
    publisher.publish(blueprint).unwrap();
    for overlay in overlays {
        publisher.publish(overlay).unwrap();
    }
    let registry = Registry::load(store.as_ref()).unwrap();
    let ctx = RequestContext::new("acme", "portal", "/home")
        .with_role("admin")
        .with_role("editor")
        .with_role("staff");
    Resolver::new()
        .resolve(&registry.resolve_layers(&ctx).unwrap())
        .unwrap()
}

proptest! {
    /// Compilation accepts a page exactly when every binding names a declared
    /// source and a field in that source's contract.
    #[test]
    fn prop_bindings_sound(declared in prop::sample::subsequence(vec![0usize, 1, 2], 0..=3), used in bindings()) {
        let mut doc = blueprint_doc("1.0.0");
        for &s in &declared {
            doc = doc.child(
                node("dataSource")
                    .attr("id", SOURCES[s])
                    .attr("kind", "http")
                    .attr("url", format!("https://{}.internal/", SOURCES[s]))
                    .attr("contract", serde_json::json!({"x": "a.x", "y": "a.y"})),
            );
        }
        let mut region = node("region").attr("id", "generated");
        for (i, &(s, f)) in used.iter().enumerate() {
            region = region.child(
                component(&format!("gen_{}", i), "Stat").child(
                    node("prop")
                        .attr("name", "v")
                        .attr("contract", format!("{}.{}", source_name(s), field_name(f))),
                ),
            );
        }
        doc = doc.child(region);

        let declared: BTreeSet<usize> = declared.into_iter().collect();
        let sound = used
            .iter()
            .all(|&(s, f)| declared.contains(&s) && f < FIELDS.len());

        let result = CompilationPipeline::new().compile(&doc, &CompileContext::new());
        prop_assert_eq!(result.is_ok(), sound);
        if let Err(e) = result {
            let errors = e.compile_errors().unwrap();
            prop_assert!(errors.iter().all(|err| matches!(
                err.code,
                ReasonCode::UnknownDataSource | ReasonCode::UnknownContractField
            )));
        }
    }

    /// Application order never depends on the order layers were listed in.
    #[test]
    fn prop_precedence_ignores_listing_order(keys in Just(all_scopes()).prop_shuffle()) {
        let mut shuffled = keys;
        shuffled.sort_by_cached_key(precedence);
        let mut canonical = all_scopes();
        canonical.sort_by_cached_key(precedence);
        prop_assert_eq!(&shuffled, &canonical);

        // tenant-only layers come before any role layer, locale-bearing ones last
        let first_role = shuffled.iter().position(|k| k.role.is_some() && k.variant.is_none() && k.locale.is_none());
        let last_tenant_only = shuffled.iter().rposition(|k| k.role.is_none() && k.variant.is_none() && k.locale.is_none());
        prop_assert!(last_tenant_only < first_role);
        prop_assert!(shuffled.last().unwrap().locale.is_some());
    }

    /// Resolving never mutates its inputs and is repeatable.
    #[test]
    fn prop_resolve_is_pure(title in "[A-Za-z ]{1,16}") {
        let blueprint = compile_blueprint(&blueprint_doc("1.0.0"));
        let overlay = compile_overlay(&retitle_hero_doc(&[("tenant", "acme")], &title), &blueprint.ir);
        let before = blueprint.ir.clone();
        let inputs = [LayerInput { ir: &overlay.ir, checksum: &overlay.checksum }];
        let base = LayerInput { ir: &blueprint.ir, checksum: &blueprint.checksum };

        let a = Resolver::new().resolve_inputs(base, &inputs).unwrap();
        let b = Resolver::new().resolve_inputs(base, &inputs).unwrap();
        prop_assert_eq!(&blueprint.ir, &before);
        prop_assert_eq!(&a.fingerprint, &b.fingerprint);
    }

    /// Conflicting overlays of equal rank resolve to the same page whatever
    /// order they were published in.
    #[test]
    fn prop_equal_rank_overlays_resolve_identically(order in Just(vec![0usize, 1, 2, 3]).prop_shuffle()) {
        let blueprint = compile_blueprint(&blueprint_doc("1.0.0"));
        let overlays: Vec<CompiledArtifact> = [
            retitle_hero_doc(&[("role", "staff")], "Staff"),
            retitle_hero_doc(&[("role", "admin")], "Admin"),
            acme_overlay_doc("Tenant", "1.0.0"),
            retitle_hero_doc(&[("role", "editor")], "Editor"),
        ]
        .iter()
        .map(|doc| compile_overlay(doc, &blueprint.ir))
        .collect();

        let canonical = resolve_published(&blueprint, &overlays.iter().collect::<Vec<_>>());
        let shuffled: Vec<&CompiledArtifact> = order.iter().map(|&i| &overlays[i]).collect();
        let resolved = resolve_published(&blueprint, &shuffled);

        prop_assert_eq!(&resolved.page, &canonical.page);
        prop_assert_eq!(&resolved.fingerprint, &canonical.fingerprint);
        // role layers tie on rank and dimensions; the key string decides, `staff` applies last
        let title = resolved.page.component("hero").and_then(|c| c.prop("title")).map(|p| p.value.clone());
        prop_assert_eq!(title, Some(PropValue::Static { value: json!("Staff") }));
    }
}
