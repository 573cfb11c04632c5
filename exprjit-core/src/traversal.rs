//! Iterative (stack-based) topology queries over the expression graph
//! (§4.B). Deep graphs are the normal case, so none of these recurse.

use std::collections::HashSet;

use crate::node::{wrapper_key, Node, OpKind};

/// Every node reachable from `roots`, in depth-first post-order (children
/// before the parent that references them). Each node appears once,
/// de-duplicated by pointer identity — callers that want hash-based
/// de-duplication (CSE) do that themselves, since two distinct `Rc`
/// allocations can share a hash.
pub fn reachable_post_order(roots: &[Node]) -> Vec<Node> {
    let mut visited: HashSet<usize> = HashSet::new();
    let mut order = Vec::new();

    // Explicit work stack of (node, next-child-index-to-visit) frames,
    // standing in for the call stack a recursive post-order walk would use.
    let mut stack: Vec<(Node, usize)> = Vec::new();

    for root in roots {
        if visited.contains(&wrapper_key(root)) {
            continue;
        }
        stack.push((root.clone(), 0));
        while let Some((node, child_idx)) = stack.pop() {
            if child_idx < node.args().len() {
                let child = node.args()[child_idx].clone();
                stack.push((node, child_idx + 1));
                if !visited.contains(&wrapper_key(&child)) {
                    stack.push((child, 0));
                }
            } else {
                let key = wrapper_key(&node);
                if visited.insert(key) {
                    order.push(node);
                }
            }
        }
    }
    order
}

/// The set of `Variable` leaves reachable from `roots`, in first-visit
/// order (pre-order, since that's the order a caller scanning for inputs
/// would naturally encounter them).
pub fn leaves(roots: &[Node]) -> Vec<Node> {
    let mut visited: HashSet<usize> = HashSet::new();
    let mut out = Vec::new();
    let mut stack: Vec<Node> = roots.iter().rev().cloned().collect();

    while let Some(node) = stack.pop() {
        let key = wrapper_key(&node);
        if !visited.insert(key) {
            continue;
        }
        if node.kind() == OpKind::Variable {
            out.push(node.clone());
        }
        for child in node.args().iter().rev() {
            if !visited.contains(&wrapper_key(child)) {
                stack.push(child.clone());
            }
        }
    }
    out
}

/// Immediate, currently-alive consumers of `node` (walks the weak
/// back-reference list maintained at construction time).
pub fn callers_of(node: &Node) -> Vec<Node> {
    node.callers()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{constant, var};

    #[test]
    fn reachable_post_order_visits_children_before_parent() {
        let x = var();
        let y = var();
        let sum = x.clone() + y.clone();
        let order = reachable_post_order(&[sum.clone()]);
        let pos = |n: &Node| order.iter().position(|m| m.ptr_eq(n)).unwrap();
        assert!(pos(&x) < pos(&sum));
        assert!(pos(&y) < pos(&sum));
    }

    #[test]
    fn leaves_collects_only_variables() {
        let x = var();
        let y = var();
        let expr = (x.clone() + constant(1.0)) * y.clone();
        let found = leaves(&[expr]);
        assert_eq!(found.len(), 2);
        assert!(found.iter().any(|n| n.ptr_eq(&x)));
        assert!(found.iter().any(|n| n.ptr_eq(&y)));
    }

    #[test]
    fn shared_subexpression_is_reached_once() {
        let x = var();
        let shared = x.clone() + x.clone();
        let top = shared.clone() * shared.clone();
        let order = reachable_post_order(&[top]);
        let shared_count = order.iter().filter(|n| n.ptr_eq(&shared)).count();
        assert_eq!(shared_count, 1);
    }

    #[test]
    fn callers_of_reports_direct_consumers() {
        let x = var();
        let y = var();
        let sum = x.clone() + y;
        let callers = callers_of(&x);
        assert_eq!(callers.len(), 1);
        assert!(callers[0].ptr_eq(&sum));
    }
}
