pub mod batch;
pub mod data;
pub mod policy;

pub use batch::{BatchKey, FlushTrigger, FlushedBatch};
pub use data::{RawMessage, Reading, SourceFormat, now_epoch_ms};
pub use policy::{DEFAULT_BATCH_SIZE, DEFAULT_DESTINATION, DevicePolicy, Transform, UnknownTransform};
