//! Typed access to a resource-oriented cluster through its command-line tool.
//!
//! The crate never speaks the cluster protocol itself: every operation is an
//! invocation of the tool (`kubectl`, `oc`) whose JSON output is parsed back
//! into navigable trees. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure logic (structured model, paths, kinds, matchers,
//!   failure classification). No I/O.
//! - **[`io`]**: Side-effecting operations (process execution, execution
//!   contexts, configuration files). Isolated behind [`io::runner::CommandRunner`]
//!   so tests can swap in an in-memory cluster.
//!
//! On top of those sit the [`Client`] (command invoker), [`ApiObject`],
//! [`Selector`] and the optimistic [`modify_and_apply`] loop.

pub mod apply;
pub mod client;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod object;
pub mod selector;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use crate::apply::{ApplyOutcome, modify_and_apply};
pub use crate::client::Client;
pub use crate::core::kind::ResourceRef;
pub use crate::core::model::{Node, Object};
pub use crate::core::path::{Path, Segment};
pub use crate::core::types::{FailureKind, InvocationResult, RetryPolicy};
pub use crate::error::{BulkFailure, Error, RemoteFailure, ResourceFailure, Result};
pub use crate::io::context::{ExecutionContext, HostKeyPolicy, SshTarget, Transport};
pub use crate::io::runner::{CommandRequest, CommandRunner, ProcessRunner};
pub use crate::object::ApiObject;
pub use crate::selector::{BulkOutcome, Selector};
