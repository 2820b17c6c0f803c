//! Domain model (ids, descriptor, status, codec, events, errors).
//!
//! I/O を持たない純粋な型だけを置きます。

pub mod codec;
pub mod descriptor;
pub mod errors;
pub mod events;
pub mod ids;
pub mod status;

pub use self::descriptor::{DEFAULT_PRIORITY, ExtraField, TaskDescriptor, extract_title};
pub use self::errors::{
    CoordError, ExecutorError, ExecutorErrorKind, StoreError, StoreErrorKind, TransitionError,
};
pub use self::events::{EventKind, EventPage, StreamEvent, StreamOffset};
pub use self::ids::{AgentId, TaskId};
pub use self::status::TaskStatus;
