pub mod execution;
pub mod runtime_node;
pub mod session;
pub mod template;

pub use execution::{Execution, ExecutionStatus};
pub use runtime_node::{NodeStatus, NodeType, RuntimeNode};
pub use session::{DependencyInstallStatus, InstalledDependency, Session, SessionStatus};
pub use template::Template;
