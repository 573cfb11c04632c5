//! Leaf constructors, combinators, and the algebraic identities that
//! simplify them on the fly (§4.A).

use std::ops::{Add, Mul, Neg, Sub};

use crate::error::GraphError;
use crate::hash;
use crate::node::{Node, OpKind, Payload};

/// A fresh symbolic input. Each call produces a distinct node; variables
/// are never deduplicated by identity across calls (§3 invariants).
pub fn var() -> Node {
    Node::new(
        OpKind::Variable,
        Vec::new(),
        hash::random_variable_hash(),
        Payload::None,
    )
}

pub fn zero() -> Node {
    Node::new(OpKind::Zero, Vec::new(), hash::ZERO_HASH, Payload::Value(0.0))
}

pub fn one() -> Node {
    Node::new(OpKind::One, Vec::new(), hash::ONE_HASH, Payload::Value(1.0))
}

pub fn constant(value: f64) -> Node {
    Node::new(
        OpKind::Constant,
        Vec::new(),
        hash::constant_hash(value),
        Payload::Value(value),
    )
}

/// Wrap an external function call. `args` must be non-empty: zero-argument
/// operations are reserved for leaves.
pub fn ext_func(name: &str, args: Vec<Node>) -> Result<Node, GraphError> {
    if name.is_empty() {
        return Err(GraphError::EmptyExternalName);
    }
    if args.is_empty() {
        return Err(GraphError::MissingArgument(OpKind::ExtCall));
    }
    let arg_hashes: Vec<i32> = args.iter().map(Node::hash).collect();
    let h = hash::ext_call_hash(name, &arg_hashes);
    Ok(Node::new(
        OpKind::ExtCall,
        args,
        h,
        Payload::ExtName(name.to_string()),
    ))
}

fn is_zero(n: &Node) -> bool {
    n.const_value() == Some(0.0)
}

fn is_one(n: &Node) -> bool {
    n.const_value() == Some(1.0)
}

fn add_impl(a: Node, b: Node) -> Node {
    if is_zero(&a) {
        return b;
    }
    if is_zero(&b) {
        return a;
    }
    if let (Some(x), Some(y)) = (a.const_value(), b.const_value()) {
        return constant(x + y);
    }
    let h = hash::add(a.hash(), b.hash());
    Node::new(OpKind::Add, vec![a, b], h, Payload::None)
}

fn sub_impl(a: Node, b: Node) -> Node {
    if is_zero(&b) {
        return a;
    }
    if is_zero(&a) {
        return negate_impl(b);
    }
    if let (Some(x), Some(y)) = (a.const_value(), b.const_value()) {
        return constant(x - y);
    }
    let h = hash::sub(a.hash(), b.hash());
    Node::new(OpKind::Sub, vec![a, b], h, Payload::None)
}

fn mul_impl(a: Node, b: Node) -> Node {
    if is_zero(&a) || is_zero(&b) {
        return zero();
    }
    if is_one(&a) {
        return b;
    }
    if is_one(&b) {
        return a;
    }
    if let (Some(x), Some(y)) = (a.const_value(), b.const_value()) {
        return constant(x * y);
    }
    let h = hash::mul(a.hash(), b.hash());
    Node::new(OpKind::Mul, vec![a, b], h, Payload::None)
}

fn negate_impl(a: Node) -> Node {
    if is_zero(&a) {
        return zero();
    }
    if let Some(v) = a.const_value() {
        return constant(-v);
    }
    let h = hash::negate(a.hash());
    Node::new(OpKind::Negate, vec![a], h, Payload::None)
}

/// `sin(0) = 0` is the only identity folded for this kind; unlike the
/// binary arithmetic ops, a general `Constant` argument is left unfolded
/// (the original only special-cases the zero identity here).
pub fn sin(a: Node) -> Node {
    if is_zero(&a) {
        return zero();
    }
    let h = hash::djb2_mix("sin:", a.hash());
    Node::new(OpKind::Sin, vec![a], h, Payload::None)
}

/// `cos(0) = 1`, mirroring [`sin`].
pub fn cos(a: Node) -> Node {
    if is_zero(&a) {
        return one();
    }
    let h = hash::djb2_mix("cos:", a.hash());
    Node::new(OpKind::Cos, vec![a], h, Payload::None)
}

impl Add for Node {
    type Output = Node;
    fn add(self, rhs: Node) -> Node {
        add_impl(self, rhs)
    }
}

impl Sub for Node {
    type Output = Node;
    fn sub(self, rhs: Node) -> Node {
        sub_impl(self, rhs)
    }
}

impl Mul for Node {
    type Output = Node;
    fn mul(self, rhs: Node) -> Node {
        mul_impl(self, rhs)
    }
}

impl Neg for Node {
    type Output = Node;
    fn neg(self) -> Node {
        negate_impl(self)
    }
}
