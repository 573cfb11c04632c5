use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

/// The closed set of operation kinds an expression graph node can carry.
///
/// Arity is fixed per kind and validated at construction time (§4.A):
/// leaves take zero arguments, `Negate`/`Sin`/`Cos` take one, the binary
/// arithmetic kinds take two, and `ExtCall` takes whatever arity its
/// external function declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Variable,
    Zero,
    One,
    Constant,
    Add,
    Sub,
    Mul,
    Negate,
    Sin,
    Cos,
    ExtCall,
}

impl OpKind {
    /// Number of arguments this kind expects, or `None` for `ExtCall`
    /// (whose arity depends on the external function being wrapped).
    pub fn fixed_arity(self) -> Option<usize> {
        match self {
            OpKind::Variable | OpKind::Zero | OpKind::One | OpKind::Constant => Some(0),
            OpKind::Negate | OpKind::Sin | OpKind::Cos => Some(1),
            OpKind::Add | OpKind::Sub | OpKind::Mul => Some(2),
            OpKind::ExtCall => None,
        }
    }
}

/// Node-kind-specific data that doesn't fit in `kind`/`args`.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    None,
    /// Numeric value for `Zero`/`One`/`Constant`.
    Value(f64),
    /// External function name for `ExtCall`.
    ExtName(String),
}

pub(crate) struct NodeData {
    pub kind: OpKind,
    pub args: Vec<Node>,
    pub hash: i32,
    pub payload: Payload,
    /// Non-owning back-references to every node that has taken this node
    /// as an argument. Weak so the DAG never becomes a cycle set (§9).
    pub callers: RefCell<Vec<Weak<NodeData>>>,
}

impl fmt::Debug for NodeData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeData")
            .field("kind", &self.kind)
            .field("hash", &self.hash)
            .field("payload", &self.payload)
            .field("args", &self.args.len())
            .finish()
    }
}

/// A handle to a node in the expression graph.
///
/// Cloning a `Node` is cheap (an `Rc` bump) and is how callers keep shared
/// sub-expressions alive; the graph itself is immutable once built.
#[derive(Clone)]
pub struct Node(pub(crate) Rc<NodeData>);

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl Node {
    pub(crate) fn new(kind: OpKind, args: Vec<Node>, hash: i32, payload: Payload) -> Node {
        let data = Rc::new(NodeData {
            kind,
            args,
            hash,
            payload,
            callers: RefCell::new(Vec::new()),
        });
        for arg in &data.args {
            arg.0.callers.borrow_mut().push(Rc::downgrade(&data));
        }
        Node(data)
    }

    pub fn kind(&self) -> OpKind {
        self.0.kind
    }

    pub fn hash(&self) -> i32 {
        self.0.hash
    }

    pub fn args(&self) -> &[Node] {
        &self.0.args
    }

    pub fn payload(&self) -> &Payload {
        &self.0.payload
    }

    /// The constant value this node denotes, if it is `Zero`/`One`/`Constant`.
    pub fn const_value(&self) -> Option<f64> {
        match (self.0.kind, &self.0.payload) {
            (OpKind::Zero, _) => Some(0.0),
            (OpKind::One, _) => Some(1.0),
            (OpKind::Constant, Payload::Value(v)) => Some(*v),
            _ => None,
        }
    }

    /// External function name, for `ExtCall` nodes.
    pub fn ext_name(&self) -> Option<&str> {
        match &self.0.payload {
            Payload::ExtName(name) => Some(name),
            _ => None,
        }
    }

    /// Pointer identity, distinct from structural-hash equality: two
    /// different `Rc` allocations can share a hash without being the same
    /// node (e.g. two `var()` calls, or two identical `constant(v)` calls).
    pub fn ptr_eq(&self, other: &Node) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Callers currently alive (i.e. not yet dropped) that take this node
    /// as a direct argument, in no particular order.
    pub fn callers(&self) -> Vec<Node> {
        self.0
            .callers
            .borrow()
            .iter()
            .filter_map(|weak| weak.upgrade().map(Node))
            .collect()
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

/// A pointer-identity key suitable for `HashSet`/`HashMap` de-duplication
/// during traversal. Not related to the node's structural [`Node::hash`].
pub fn wrapper_key(node: &Node) -> usize {
    Rc::as_ptr(&node.0) as usize
}
