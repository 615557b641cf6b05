//! Schema-driven planning.
//!
//! Computes the planned state, the attribute changes and whether replacement is
//! required, using the plan modifiers declared on each attribute and block.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::schema::{Attribute, Block, PlanModifier, Schema};
use crate::types::{AttributeChange, PlanResult};

/// Plan a create, update or delete of one resource.
///
/// - `prior_state == None` plans a create.
/// - a null `proposed_state` plans a delete.
/// - otherwise an update of `prior_state` towards `proposed_state`; `config`
///   is the user-written configuration, used by
///   [`PlanModifier::RequiresReplaceIfConfigured`].
pub fn plan_resource(
    schema: &Schema,
    prior_state: Option<&Value>,
    proposed_state: &Value,
    config: &Value,
) -> PlanResult {
    match (prior_state, proposed_state) {
        (Some(prior), Value::Null) => plan_delete(&schema.block, prior),
        (None, proposed) => plan_create(&schema.block, proposed),
        (Some(prior), proposed) => plan_update(&schema.block, prior, proposed, config),
    }
}

fn field_names(block: &Block) -> BTreeSet<&str> {
    block
        .attributes
        .keys()
        .chain(block.blocks.keys())
        .map(String::as_str)
        .collect()
}

fn get<'a>(value: &'a Value, name: &str) -> &'a Value {
    value.get(name).unwrap_or(&Value::Null)
}

fn plan_create(block: &Block, proposed: &Value) -> PlanResult {
    let changes = field_names(block)
        .into_iter()
        .filter_map(|name| match get(proposed, name) {
            Value::Null => None,
            value => Some(AttributeChange::added(name, value.clone())),
        })
        .collect();

    PlanResult::with_changes(proposed.clone(), changes, false)
}

fn plan_delete(block: &Block, prior: &Value) -> PlanResult {
    let changes = field_names(block)
        .into_iter()
        .filter_map(|name| match get(prior, name) {
            Value::Null => None,
            value => Some(AttributeChange::removed(name, value.clone())),
        })
        .collect();

    PlanResult::with_changes(Value::Null, changes, false)
}

fn plan_update(block: &Block, prior: &Value, proposed: &Value, config: &Value) -> PlanResult {
    let mut planned = match proposed {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    let mut changes = Vec::new();
    let mut requires_replace = false;

    for (name, attr) in &block.attributes {
        let prior_value = get(prior, name);
        if get(proposed, name).is_null() && keeps_prior(attr) && !prior_value.is_null() {
            planned.insert(name.clone(), prior_value.clone());
        }
    }

    for (name, nested) in &block.blocks {
        let prior_items = get(prior, name);
        if let Some(Value::Array(items)) = planned.get_mut(name) {
            carry_nested_unknowns(&nested.block, prior_items, items);
        }
    }

    let planned = Value::Object(planned);

    for name in field_names(block) {
        let before = get(prior, name);
        let after = get(&planned, name);
        if before == after {
            continue;
        }

        changes.push(match (before, after) {
            (Value::Null, after) => AttributeChange::added(name, after.clone()),
            (before, Value::Null) => AttributeChange::removed(name, before.clone()),
            (before, after) => AttributeChange::modified(name, before.clone(), after.clone()),
        });

        let configured = !get(config, name).is_null();
        let forces_replace = match (block.attributes.get(name), block.blocks.get(name)) {
            (Some(attr), _) => replace_on_change(&attr.plan_modifiers, configured),
            (None, Some(nested)) => replace_on_change(&nested.plan_modifiers, configured),
            (None, None) => false,
        };
        requires_replace |= forces_replace;
    }

    PlanResult::with_changes(planned, changes, requires_replace)
}

fn keeps_prior(attr: &Attribute) -> bool {
    attr.flags.is_computed_only()
        || (attr.flags.computed && attr.has_modifier(PlanModifier::UseStateForUnknown))
}

fn replace_on_change(modifiers: &[PlanModifier], configured: bool) -> bool {
    modifiers.iter().any(|m| match m {
        PlanModifier::RequiresReplace => true,
        PlanModifier::RequiresReplaceIfConfigured => configured,
        PlanModifier::UseStateForUnknown => false,
    })
}

/// Fill unknown computed attributes of nested items from the prior item at the same index.
fn carry_nested_unknowns(block: &Block, prior_items: &Value, items: &mut [Value]) {
    let Value::Array(prior_items) = prior_items else {
        return;
    };

    for (item, prior_item) in items.iter_mut().zip(prior_items) {
        let Value::Object(item) = item else {
            continue;
        };
        for (name, attr) in &block.attributes {
            let unknown = item.get(name).map_or(true, Value::is_null);
            let prior_value = get(prior_item, name);
            if unknown && keeps_prior(attr) && !prior_value.is_null() {
                item.insert(name.clone(), prior_value.clone());
            }
        }
    }
}
