pub use crate::content_type::content_type_for;
pub use crate::guard::Holdings;
pub use crate::resolver::{
    Attempt, ExternalFileProvider, NoExternalFiles, ResolveError, ResolvedTask,
    SandboxedFileResolver,
};

mod content_type;
mod guard;
mod resolver;
