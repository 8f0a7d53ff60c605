use reshard_core::ShardingError;
use reshard_ir::IrError;
use thiserror::Error;

/// Error type for sharding projections, passes, and pass managers.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum PassError {
    /// Error returned when a sharding refers to a mesh that is not declared in the symbol table. This aborts the
    /// whole pass manager run.
    #[error("operation '{operation}' in function '{function_name}' refers to unknown mesh '@{mesh_name}'")]
    UnknownMesh { mesh_name: String, function_name: String, operation: String },

    /// Error returned when the IR does not verify after running a pass.
    #[error("IR verification failed after pass '{pass_name}': {source}")]
    VerificationFailed {
        pass_name: String,
        #[source]
        source: IrError,
    },

    /// Error returned by [`ClosurePass`](crate::ClosurePass)es and other user-provided passes.
    #[error("pass '{pass_name}' failed: {message}")]
    PassFailed { pass_name: String, message: String },

    #[error(transparent)]
    Ir(#[from] IrError),

    #[error(transparent)]
    Sharding(#[from] ShardingError),
}
