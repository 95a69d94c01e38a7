use thiserror::Error;

/// A problem with the input function, reported to the user instead of
/// aborting the whole batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("function `{name}` is too large: {values} values, the limit is {limit}")]
    FuncTooLarge {
        name: String,
        values: usize,
        limit: usize,
    },

    #[error("function `{name}` has no blocks")]
    EmptyFunc { name: String },
}
