//! Public types for the Bifrost API.

mod capabilities;
mod event;
mod request;
mod response;

pub use capabilities::{Capabilities, Operation};
pub use event::{EventKind, UsageEvent};
pub use request::{OperationRequest, ShouldRetry};
pub use response::{
    BackendOutput, DispatchResponse, DispatchStream, FragmentStream, StreamEvent, Usage,
};
