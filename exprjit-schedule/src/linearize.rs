//! Linearization scheduler (§4.C).
//!
//! Strategy: depth-first post-order from each output (so a value is
//! consumed as soon as possible, shrinking live ranges), de-duplicated by
//! structural hash keeping the first occurrence — that de-duplication
//! *is* CSE at the schedule level. `exprjit_core::traversal::reachable_post_order`
//! already returns children before parents with pointer-level
//! de-duplication, which is the post-order the original's stack-based
//! "push, pop-and-push-args, reverse" construction converges to; we only
//! need to add the hash-keyed de-duplication pass on top of it.

use std::collections::HashMap;

use exprjit_core::node::wrapper_key;
use exprjit_core::traversal;
use exprjit_core::{Node, OpKind};

use crate::error::ScheduleError;

/// A linearized, CSE-deduplicated sequence of nodes plus the bookkeeping
/// needed to map a node's structural hash back to its step index.
#[derive(Debug)]
pub struct Schedule {
    /// Distinct nodes in topological order: step `t`'s arguments are all
    /// at some step `< t` (or are themselves `Input` leaves).
    pub nodes: Vec<Node>,
    /// Structural hash -> step index, for the representative node kept
    /// after CSE de-duplication.
    pub index_of: HashMap<i32, usize>,
    pub inputs: Vec<Node>,
    pub outputs: Vec<Node>,
}

impl Schedule {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Step index of the representative node sharing `hash`, if any is
    /// part of this schedule.
    pub fn index_of_hash(&self, hash: i32) -> Option<usize> {
        self.index_of.get(&hash).copied()
    }
}

/// Build a [`Schedule`] for `outputs`, given the caller's declared
/// `inputs` order (which fixes `Input(i)` indices downstream).
///
/// `ext_call_first` enables the optional heuristic from §4.C: a `sin`/`cos`
/// fed directly by an `Input` is hoisted, together with that input's own
/// materialization step, to the very front of the schedule.
pub fn linearize(
    inputs: &[Node],
    outputs: &[Node],
    ext_call_first: bool,
) -> Result<Schedule, ScheduleError> {
    for i in 0..inputs.len() {
        for j in (i + 1)..inputs.len() {
            if inputs[i].ptr_eq(&inputs[j]) {
                return Err(ScheduleError::DuplicateInput);
            }
        }
    }

    let post_order = traversal::reachable_post_order(outputs);

    let mut nodes: Vec<Node> = Vec::with_capacity(post_order.len());
    let mut index_of: HashMap<i32, usize> = HashMap::with_capacity(post_order.len());
    for node in post_order {
        if !index_of.contains_key(&node.hash()) {
            index_of.insert(node.hash(), nodes.len());
            nodes.push(node);
        }
    }

    if ext_call_first {
        hoist_ext_call_first(&mut nodes, &mut index_of, inputs);
    }

    log::debug!(
        "linearized schedule: {} steps ({} inputs, {} outputs, ext_call_first={})",
        nodes.len(),
        inputs.len(),
        outputs.len(),
        ext_call_first
    );

    Ok(Schedule {
        nodes,
        index_of,
        inputs: inputs.to_vec(),
        outputs: outputs.to_vec(),
    })
}

/// Move each `(Input, sin|cos)` pair fed directly by an input to the
/// front of the schedule, preserving the input-before-call order within
/// each pair and the relative order of everything else.
fn hoist_ext_call_first(
    nodes: &mut Vec<Node>,
    index_of: &mut HashMap<i32, usize>,
    inputs: &[Node],
) {
    let mut hoist_keys: Vec<usize> = Vec::new();
    let mut seen_keys = std::collections::HashSet::new();

    for input in inputs {
        let Some(&input_idx) = index_of.get(&input.hash()) else {
            continue;
        };
        let input_node = &nodes[input_idx];
        if input_node.kind() != OpKind::Variable {
            continue;
        }
        for caller in traversal::callers_of(input_node) {
            let is_direct_sincos = matches!(caller.kind(), OpKind::Sin | OpKind::Cos)
                && caller.args().first().is_some_and(|a| a.ptr_eq(input_node));
            if !is_direct_sincos {
                continue;
            }
            let Some(&call_idx) = index_of.get(&caller.hash()) else {
                continue;
            };
            let input_key = wrapper_key(input_node);
            if seen_keys.insert(input_key) {
                hoist_keys.push(input_idx);
            }
            let call_key = wrapper_key(&nodes[call_idx]);
            if seen_keys.insert(call_key) {
                hoist_keys.push(call_idx);
            }
        }
    }

    if hoist_keys.is_empty() {
        return;
    }

    let hoist_set: std::collections::HashSet<usize> = hoist_keys.iter().copied().collect();
    let mut reordered: Vec<Node> = Vec::with_capacity(nodes.len());
    for &idx in &hoist_keys {
        reordered.push(nodes[idx].clone());
    }
    for (idx, node) in nodes.iter().enumerate() {
        if !hoist_set.contains(&idx) {
            reordered.push(node.clone());
        }
    }

    index_of.clear();
    for (i, node) in reordered.iter().enumerate() {
        index_of.insert(node.hash(), i);
    }
    *nodes = reordered;
}

#[cfg(test)]
mod tests {
    use super::*;
    use exprjit_core::builder::{cos, sin, var};

    #[test]
    fn arguments_precede_consumers() {
        let x = var();
        let y = var();
        let sum = x.clone() + y.clone();
        let schedule = linearize(&[x, y], &[sum.clone()], false).unwrap();
        let sum_idx = schedule.index_of_hash(sum.hash()).unwrap();
        for arg in sum.args() {
            let arg_idx = schedule.index_of_hash(arg.hash()).unwrap();
            assert!(arg_idx < sum_idx);
        }
    }

    #[test]
    fn cse_keeps_a_single_schedule_entry_per_hash() {
        let x = var();
        let f = sin(x.clone()) + cos(x.clone());
        let g = cos(x.clone()) + sin(x.clone());
        assert_eq!(f.hash(), g.hash());
        let schedule = linearize(&[x], &[f, g], false).unwrap();
        let hashes: std::collections::HashSet<i32> =
            schedule.nodes.iter().map(|n| n.hash()).collect();
        assert_eq!(hashes.len(), schedule.nodes.len());
    }

    #[test]
    fn duplicate_inputs_are_rejected() {
        let x = var();
        let f = x.clone() + x.clone();
        let err = linearize(&[x.clone(), x], &[f], false).unwrap_err();
        assert_eq!(err, ScheduleError::DuplicateInput);
    }

    #[test]
    fn ext_call_first_hoists_direct_trig_pair() {
        let x = var();
        let y = var();
        let noise = y.clone() + y.clone();
        let trig = sin(x.clone());
        let top = noise + trig.clone();
        let schedule = linearize(&[x.clone(), y], &[top], true).unwrap();
        let x_idx = schedule.index_of_hash(x.hash()).unwrap();
        let trig_idx = schedule.index_of_hash(trig.hash()).unwrap();
        assert_eq!(x_idx, 0);
        assert_eq!(trig_idx, 1);
    }
}
