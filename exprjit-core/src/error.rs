/// Errors raised while constructing or querying an expression graph.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    #[error("operand to a graph combinator was null")]
    NullArgument,

    #[error("external call must carry a non-empty function name")]
    EmptyExternalName,

    #[error("operation '{0:?}' requires at least one argument")]
    MissingArgument(crate::node::OpKind),
}
