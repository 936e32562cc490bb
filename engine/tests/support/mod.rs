pub mod connector;
pub mod operator;
pub mod runtime;

pub use connector::UppercaseConnector;
pub use operator::{EchoOperator, FlakyOperator};
pub use runtime::InstantWorkflowRuntime;
