//! Patch Application - merge / replace / remove
//!
//! Every function takes a tree by reference and returns a new one. The input
//! is never touched.

use std::collections::BTreeSet;
use thiserror::Error;

use crate::ir::{
    Action, ActionPatch, Component, ComponentPatch, DataSource, DataSourcePatch, PageDefinition,
    Patch, PatchOp, PatchPayload, PatchTarget, Prop, RegionPatch,
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("{target} `{id}` does not exist")]
    MissingTarget { target: PatchTarget, id: String },

    #[error("{target} `{id}`: {reason}")]
    Incomplete {
        target: PatchTarget,
        id: String,
        reason: String,
    },

    #[error("{target} `{id}`: payload is a {payload}")]
    PayloadMismatch {
        target: PatchTarget,
        id: String,
        payload: PatchTarget,
    },

    #[error("component id `{0}` would appear twice")]
    DuplicateComponent(String),
}

/// Apply a single patch.
pub fn apply_patch(page: &PageDefinition, patch: &Patch) -> Result<PageDefinition, PatchError> {
    let mut next = page.clone();
    let id = patch.target_id.as_str();
    let missing = || PatchError::MissingTarget {
        target: patch.target,
        id: id.to_string(),
    };

    if let Some(payload) = &patch.payload {
        if payload.target() != patch.target {
            return Err(PatchError::PayloadMismatch {
                target: patch.target,
                id: id.to_string(),
                payload: payload.target(),
            });
        }
    } else if patch.operation != PatchOp::Remove {
        return Err(PatchError::Incomplete {
            target: patch.target,
            id: id.to_string(),
            reason: "no payload".to_string(),
        });
    }

    match (patch.target, patch.operation, &patch.payload) {
        (PatchTarget::Region, PatchOp::Remove, _) => {
            let index = next.regions.iter().position(|r| r.id == id).ok_or_else(missing)?;
            next.regions.remove(index);
        }
        (PatchTarget::Region, op, Some(PatchPayload::Region(payload))) => {
            let index = next.regions.iter().position(|r| r.id == id).ok_or_else(missing)?;
            apply_region(&mut next, index, op, payload)?;
        }
        (PatchTarget::Component, PatchOp::Remove, _) => {
            let (r, c) = locate_component(&next, id).ok_or_else(missing)?;
            next.regions[r].components.remove(c);
        }
        (PatchTarget::Component, op, Some(PatchPayload::Component(payload))) => {
            let (r, c) = locate_component(&next, id).ok_or_else(missing)?;
            let slot = &mut next.regions[r].components[c];
            *slot = match op {
                PatchOp::Replace => complete_component(payload, id)?,
                _ => merged_component(slot, payload),
            };
        }
        (PatchTarget::DataSource, PatchOp::Remove, _) => {
            let index = next.data_sources.iter().position(|d| d.id == id).ok_or_else(missing)?;
            next.data_sources.remove(index);
        }
        (PatchTarget::DataSource, op, Some(PatchPayload::DataSource(payload))) => {
            let index = next.data_sources.iter().position(|d| d.id == id).ok_or_else(missing)?;
            let slot = &mut next.data_sources[index];
            *slot = match op {
                PatchOp::Replace => complete_data_source(payload, id)?,
                _ => merged_data_source(slot, payload),
            };
        }
        (PatchTarget::Action, PatchOp::Remove, _) => {
            let index = next.actions.iter().position(|a| a.id == id).ok_or_else(missing)?;
            next.actions.remove(index);
        }
        (PatchTarget::Action, op, Some(PatchPayload::Action(payload))) => {
            let index = next.actions.iter().position(|a| a.id == id).ok_or_else(missing)?;
            let slot = &mut next.actions[index];
            *slot = match op {
                PatchOp::Replace => complete_action(payload, id)?,
                _ => merged_action(slot, payload),
            };
        }
        // payload/target agreement was checked above
        (target, _, _) => {
            return Err(PatchError::Incomplete {
                target,
                id: id.to_string(),
                reason: "no payload".to_string(),
            })
        }
    }
    Ok(next)
}

/// Apply every patch of `overlay` in order, then its constants.
pub fn apply_overlay(base: &PageDefinition, overlay: &PageDefinition) -> Result<PageDefinition, PatchError> {
    let mut tree = overlay
        .patches
        .iter()
        .try_fold(base.clone(), |tree, patch| apply_patch(&tree, patch))?;
    tree.constants
        .extend(overlay.constants.iter().map(|(k, v)| (k.clone(), v.clone())));
    ensure_unique_components(&tree)?;
    Ok(tree)
}

pub fn ensure_unique_components(page: &PageDefinition) -> Result<(), PatchError> {
    let mut seen = BTreeSet::new();
    for component in page.components() {
        if !seen.insert(component.id.as_str()) {
            return Err(PatchError::DuplicateComponent(component.id.clone()));
        }
    }
    Ok(())
}

fn locate_component(page: &PageDefinition, id: &str) -> Option<(usize, usize)> {
    page.regions.iter().enumerate().find_map(|(r, region)| {
        region
            .components
            .iter()
            .position(|c| c.id == id)
            .map(|c| (r, c))
    })
}

fn apply_region(
    page: &mut PageDefinition,
    index: usize,
    op: PatchOp,
    payload: &RegionPatch,
) -> Result<(), PatchError> {
    let region_id = page.regions[index].id.clone();
    let mut components = match op {
        PatchOp::Replace => Vec::new(),
        _ => page.regions[index].components.clone(),
    };
    for patch in &payload.components {
        let id = patch.id.clone().ok_or_else(|| PatchError::Incomplete {
            target: PatchTarget::Region,
            id: region_id.clone(),
            reason: "component payload without id".to_string(),
        })?;
        if let Some(existing) = components.iter_mut().find(|c| c.id == id) {
            *existing = merged_component(existing, patch);
            continue;
        }
        let elsewhere = page
            .regions
            .iter()
            .enumerate()
            .any(|(r, region)| r != index && region.components.iter().any(|c| c.id == id));
        if elsewhere {
            return Err(PatchError::DuplicateComponent(id));
        }
        components.push(complete_component(patch, &id)?);
    }
    page.regions[index].components = components;
    Ok(())
}

/// Overlay props override same-named props; unmatched props append.
pub fn merge_props(base: &[Prop], overrides: &[Prop]) -> Vec<Prop> {
    let mut props = base.to_vec();
    for prop in overrides {
        match props.iter_mut().find(|p| p.name == prop.name) {
            Some(existing) => existing.value = prop.value.clone(),
            None => props.push(prop.clone()),
        }
    }
    props
}

fn merged_component(base: &Component, patch: &ComponentPatch) -> Component {
    Component {
        id: base.id.clone(),
        type_name: patch.type_name.clone().unwrap_or_else(|| base.type_name.clone()),
        namespace: patch.namespace.clone().unwrap_or_else(|| base.namespace.clone()),
        version: patch.version.clone().or_else(|| base.version.clone()),
        props: merge_props(&base.props, &patch.props),
        access: patch.access.clone().or_else(|| base.access.clone()),
    }
}

fn complete_component(patch: &ComponentPatch, id: &str) -> Result<Component, PatchError> {
    patch.to_component(id).ok_or_else(|| PatchError::Incomplete {
        target: PatchTarget::Component,
        id: id.to_string(),
        reason: "new or replacing component needs `type` and `namespace`".to_string(),
    })
}

fn merged_data_source(base: &DataSource, patch: &DataSourcePatch) -> DataSource {
    let mut contract = base.contract.clone();
    contract.extend(patch.contract.iter().map(|(k, v)| (k.clone(), v.clone())));
    DataSource {
        id: base.id.clone(),
        spec: patch.spec.clone().unwrap_or_else(|| base.spec.clone()),
        contract,
        access: patch.access.clone().or_else(|| base.access.clone()),
    }
}

fn complete_data_source(patch: &DataSourcePatch, id: &str) -> Result<DataSource, PatchError> {
    let spec = patch.spec.clone().ok_or_else(|| PatchError::Incomplete {
        target: PatchTarget::DataSource,
        id: id.to_string(),
        reason: "replacing data source needs `kind`".to_string(),
    })?;
    Ok(DataSource {
        id: id.to_string(),
        spec,
        contract: patch.contract.clone(),
        access: patch.access.clone(),
    })
}

fn merged_action(base: &Action, patch: &ActionPatch) -> Action {
    Action {
        id: base.id.clone(),
        kind: patch.kind.clone().unwrap_or_else(|| base.kind.clone()),
        config: merge_props(&base.config, &patch.config),
        access: patch.access.clone().or_else(|| base.access.clone()),
    }
}

fn complete_action(patch: &ActionPatch, id: &str) -> Result<Action, PatchError> {
    let kind = patch.kind.clone().ok_or_else(|| PatchError::Incomplete {
        target: PatchTarget::Action,
        id: id.to_string(),
        reason: "replacing action needs `kind`".to_string(),
    })?;
    Ok(Action {
        id: id.to_string(),
        kind,
        config: patch.config.clone(),
        access: patch.access.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{PageKind, PropValue, Region, Scope};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn component(id: &str, title: &str) -> Component {
        Component {
            id: id.into(),
            type_name: "Banner".into(),
            namespace: "core".into(),
            version: None,
            props: vec![
                Prop::static_value("title", json!(title)),
                Prop::static_value("tone", json!("neutral")),
            ],
            access: None,
        }
    }

    fn page() -> PageDefinition {
        PageDefinition {
            kind: PageKind::Blueprint,
            schema_version: "1.0.0".into(),
            content_version: "1.0.0".into(),
            module: "portal".into(),
            route: "/home".into(),
            scope: Scope::default(),
            page_id: Some("home".into()),
            extends: None,
            regions: vec![Region {
                id: "main".into(),
                components: vec![component("hero", "Welcome")],
            }],
            data_sources: vec![],
            actions: vec![],
            constants: BTreeMap::new(),
            patches: vec![],
        }
    }

    fn component_patch(props: Vec<Prop>) -> ComponentPatch {
        ComponentPatch {
            props,
            ..Default::default()
        }
    }

    #[test]
    fn test_merge_component_overrides_and_retains_props() {
        let patch = Patch {
            target: PatchTarget::Component,
            target_id: "hero".into(),
            operation: PatchOp::Merge,
            payload: Some(PatchPayload::Component(component_patch(vec![
                Prop::static_value("title", json!("Welcome, Acme")),
                Prop::static_value("badge", json!("new")),
            ]))),
        };
        let base = page();
        let next = apply_patch(&base, &patch).unwrap();
        let hero = next.component("hero").unwrap();
        let names: Vec<_> = hero.props.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["title", "tone", "badge"]);
        assert_eq!(
            hero.prop("title").unwrap().value,
            PropValue::Static { value: json!("Welcome, Acme") }
        );
        // the input tree is untouched
        assert_eq!(base, page());
    }

    #[test]
    fn test_region_merge_appends_and_merges() {
        let mut new_card = component_patch(vec![Prop::static_value("title", json!("Card"))]);
        new_card.id = Some("card".into());
        new_card.type_name = Some("Card".into());
        new_card.namespace = Some("core".into());
        let mut hero = component_patch(vec![Prop::static_value("tone", json!("loud"))]);
        hero.id = Some("hero".into());

        let patch = Patch {
            target: PatchTarget::Region,
            target_id: "main".into(),
            operation: PatchOp::Merge,
            payload: Some(PatchPayload::Region(RegionPatch {
                components: vec![hero, new_card],
            })),
        };
        let next = apply_patch(&page(), &patch).unwrap();
        let ids: Vec<_> = next.components().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["hero", "card"]);
        assert_eq!(
            next.component("hero").unwrap().prop("tone").unwrap().value,
            PropValue::Static { value: json!("loud") }
        );
    }

    #[test]
    fn test_region_merge_rejects_incomplete_new_component() {
        let mut partial = component_patch(vec![]);
        partial.id = Some("ghost".into());
        let patch = Patch {
            target: PatchTarget::Region,
            target_id: "main".into(),
            operation: PatchOp::Merge,
            payload: Some(PatchPayload::Region(RegionPatch {
                components: vec![partial],
            })),
        };
        assert!(matches!(
            apply_patch(&page(), &patch),
            Err(PatchError::Incomplete { .. })
        ));
    }

    #[test]
    fn test_replace_substitutes_subtree() {
        let mut replacement = component_patch(vec![Prop::static_value("src", json!("/a.png"))]);
        replacement.type_name = Some("Image".into());
        replacement.namespace = Some("media".into());
        let patch = Patch {
            target: PatchTarget::Component,
            target_id: "hero".into(),
            operation: PatchOp::Replace,
            payload: Some(PatchPayload::Component(replacement)),
        };
        let next = apply_patch(&page(), &patch).unwrap();
        let hero = next.component("hero").unwrap();
        assert_eq!(hero.type_name, "Image");
        assert_eq!(hero.props.len(), 1);
        assert!(hero.prop("title").is_none());
    }

    #[test]
    fn test_remove_then_target_is_missing() {
        let remove = Patch {
            target: PatchTarget::Component,
            target_id: "hero".into(),
            operation: PatchOp::Remove,
            payload: None,
        };
        let next = apply_patch(&page(), &remove).unwrap();
        assert!(next.region("main").unwrap().components.is_empty());
        assert_eq!(
            apply_patch(&next, &remove).unwrap_err(),
            PatchError::MissingTarget {
                target: PatchTarget::Component,
                id: "hero".into()
            }
        );
    }

    #[test]
    fn test_payload_must_match_target() {
        let patch = Patch {
            target: PatchTarget::Region,
            target_id: "main".into(),
            operation: PatchOp::Merge,
            payload: Some(PatchPayload::Component(component_patch(vec![]))),
        };
        assert!(matches!(
            apply_patch(&page(), &patch),
            Err(PatchError::PayloadMismatch { .. })
        ));
    }
}
