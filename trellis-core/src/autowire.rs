//! Constructor argument matching.
//!
//! Candidate constructors (or factory methods) are tried greediest-first.
//! For each parameter slot, an explicitly declared value is matched before
//! autowiring is considered: an indexed value bound to that slot wins, then
//! the best-fitting unconsumed generic value. Matching never consumes a
//! declared value twice within one candidate, and candidates are compared
//! by total type-distance weight when they tie on arity.

use smallvec::SmallVec;

use crate::definition::{ArgValue, ConstructorArgs};
use crate::types::TypeRegistry;
use crate::value::{TypeKey, Value};

/// How well a declared value fits a parameter slot. Lower is better.
pub(crate) const WEIGHT_EXACT: u32 = 0;
pub(crate) const WEIGHT_COERCED: u32 = 1;
pub(crate) const WEIGHT_ASSIGNABLE: u32 = 2;

/// Scalar coercions the default converter supports.
fn coercible(from: TypeKey, to: TypeKey) -> bool {
    matches!(
        (from, to),
        (TypeKey::Str, TypeKey::Int)
            | (TypeKey::Str, TypeKey::Float)
            | (TypeKey::Str, TypeKey::Bool)
            | (TypeKey::Int, TypeKey::Float)
            | (TypeKey::Bool, TypeKey::Str)
            | (TypeKey::Int, TypeKey::Str)
            | (TypeKey::Float, TypeKey::Str)
    )
}

fn declared_weight(declared: TypeKey, param: TypeKey, types: &TypeRegistry) -> Option<u32> {
    if declared == param {
        return Some(WEIGHT_EXACT);
    }
    if coercible(declared, param) {
        return Some(WEIGHT_COERCED);
    }
    if let TypeKey::Component(actual) = declared {
        if types.is_assignable(actual, param) {
            return Some(WEIGHT_ASSIGNABLE);
        }
    }
    None
}

/// Weight of one declared value against one parameter type, or `None` when
/// the value cannot possibly satisfy the slot.
pub(crate) fn arg_weight(arg: &ArgValue, param: TypeKey, types: &TypeRegistry) -> Option<u32> {
    if let Some(declared) = arg.declared_type {
        return declared_weight(declared, param, types);
    }
    match &arg.value {
        // An untyped null fits any slot, but never better than a real value.
        Value::Null => Some(WEIGHT_COERCED),
        Value::Bool(_) => declared_weight(TypeKey::Bool, param, types),
        Value::Int(_) => declared_weight(TypeKey::Int, param, types),
        Value::Float(_) => declared_weight(TypeKey::Float, param, types),
        Value::Str(_) => declared_weight(TypeKey::Str, param, types),
        Value::List(_) => (param == TypeKey::List).then_some(WEIGHT_EXACT),
        Value::Map(_) => (param == TypeKey::Map).then_some(WEIGHT_EXACT),
        // References and inline definitions resolve to components; the
        // concrete type is only known after creation, so the match is
        // optimistic here and type-checked at conversion time.
        Value::Ref(_) | Value::Inner(_) => {
            matches!(param, TypeKey::Component(_)).then_some(WEIGHT_ASSIGNABLE)
        }
    }
}

/// Per-candidate consumption state for generic argument values.
pub(crate) struct ArgUsage {
    generic_used: SmallVec<[bool; 8]>,
}

impl ArgUsage {
    pub(crate) fn new(args: &ConstructorArgs) -> Self {
        Self {
            generic_used: SmallVec::from_elem(false, args.generic().len()),
        }
    }

    /// A candidate that leaves declared values unconsumed is not the one
    /// the definition meant.
    pub(crate) fn all_generics_consumed(&self) -> bool {
        self.generic_used.iter().all(|&used| used)
    }
}

/// Outcome of matching declared values against one parameter slot.
pub(crate) enum SlotMatch {
    /// A declared value fits; carries its fit weight.
    Taken { arg: ArgValue, weight: u32 },
    /// No declared value addresses this slot; autowiring may fill it.
    Open,
    /// A value is explicitly bound to this slot but cannot satisfy its
    /// type, so the whole candidate is unusable.
    Reject,
}

pub(crate) fn match_slot(
    slot: usize,
    param: TypeKey,
    args: &ConstructorArgs,
    usage: &mut ArgUsage,
    types: &TypeRegistry,
) -> SlotMatch {
    if let Some(indexed) = args.indexed().get(&slot) {
        return match arg_weight(indexed, param, types) {
            Some(weight) => SlotMatch::Taken {
                arg: indexed.clone(),
                weight,
            },
            None => SlotMatch::Reject,
        };
    }

    let mut best: Option<(usize, u32)> = None;
    for (i, arg) in args.generic().iter().enumerate() {
        if usage.generic_used[i] {
            continue;
        }
        if let Some(weight) = arg_weight(arg, param, types) {
            if best.is_none_or(|(_, w)| weight < w) {
                best = Some((i, weight));
            }
        }
    }
    match best {
        Some((i, weight)) => {
            usage.generic_used[i] = true;
            SlotMatch::Taken {
                arg: args.generic()[i].clone(),
                weight,
            }
        }
        None => SlotMatch::Open,
    }
}

/// Candidate arities to try, greediest first. Candidates that cannot hold
/// all declared values are excluded up front.
pub(crate) fn viable_arities(arities: impl Iterator<Item = usize>, args: &ConstructorArgs) -> Vec<usize> {
    let min = args
        .indexed()
        .keys()
        .next_back()
        .map(|i| i + 1)
        .unwrap_or(0)
        .max(args.count());
    let mut out: Vec<usize> = arities.filter(|&n| n >= min).collect();
    out.sort_unstable_by(|a, b| b.cmp(a));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn untyped(value: Value) -> ArgValue {
        ArgValue {
            value,
            declared_type: None,
        }
    }

    #[test]
    fn weight_ranks_exact_below_coerced() {
        let types = TypeRegistry::new();
        let s = untyped(Value::str("8080"));
        assert_eq!(arg_weight(&s, TypeKey::Str, &types), Some(WEIGHT_EXACT));
        assert_eq!(arg_weight(&s, TypeKey::Int, &types), Some(WEIGHT_COERCED));
        assert_eq!(arg_weight(&s, TypeKey::List, &types), None);
        assert_eq!(
            arg_weight(&untyped(Value::reference("sink")), TypeKey::Component("AuditSink"), &types),
            Some(WEIGHT_ASSIGNABLE)
        );
    }

    #[test]
    fn indexed_value_binds_its_slot_or_rejects_candidate() {
        let types = TypeRegistry::new();
        let mut args = ConstructorArgs::default();
        args.add_indexed(1, Value::Int(9), None);
        let mut usage = ArgUsage::new(&args);

        assert!(matches!(
            match_slot(1, TypeKey::Int, &args, &mut usage, &types),
            SlotMatch::Taken { weight: WEIGHT_EXACT, .. }
        ));
        assert!(matches!(
            match_slot(1, TypeKey::List, &args, &mut usage, &types),
            SlotMatch::Reject
        ));
        assert!(matches!(
            match_slot(0, TypeKey::Int, &args, &mut usage, &types),
            SlotMatch::Open
        ));
    }

    #[test]
    fn generic_values_are_consumed_once() {
        let types = TypeRegistry::new();
        let mut args = ConstructorArgs::default();
        args.add_generic(Value::str("only"), None);
        let mut usage = ArgUsage::new(&args);

        assert!(matches!(
            match_slot(0, TypeKey::Str, &args, &mut usage, &types),
            SlotMatch::Taken { .. }
        ));
        assert!(matches!(
            match_slot(1, TypeKey::Str, &args, &mut usage, &types),
            SlotMatch::Open
        ));
    }

    #[test]
    fn arities_are_greediest_first_above_declared_count() {
        let mut args = ConstructorArgs::default();
        args.add_generic(Value::Int(1), None);
        args.add_generic(Value::Int(2), None);
        assert_eq!(viable_arities([0, 1, 2, 3].into_iter(), &args), vec![3, 2]);

        let mut indexed = ConstructorArgs::default();
        indexed.add_indexed(2, Value::Int(1), None);
        assert_eq!(viable_arities([1, 2, 3, 4].into_iter(), &indexed), vec![4, 3]);
    }
}
