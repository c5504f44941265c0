pub mod channel;
pub mod event_bus;
pub mod logger;

pub use channel::Channel;
pub use event_bus::{
    BusEvent, ChannelSurface, EventBus, EventError, EventReceiver, EventResult, QueuedEvent,
    RemoteSurface, SurfaceMessage,
};
pub use logger::{EventLogger, OperationLogger, OperationScope, TracingLogger};
