//! Actors of the sync core.
//!
//! Each actor processes one message at a time, which is what makes the
//! read-modify-write cycles on the local store atomic within the process.

pub mod connectivity;
pub mod operation_queue;

pub use connectivity::{
    ConnectivityMonitorActor, ConnectivityMonitorArguments, ConnectivityMonitorMsg,
    ConnectivityProbe, HttpProbe, ManualProbe,
};
pub use operation_queue::{
    OperationQueueActor, OperationQueueArguments, OperationQueueMsg, QueueError, QueueHandle,
};
