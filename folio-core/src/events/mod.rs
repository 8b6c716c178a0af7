pub mod bus;

pub use bus::{BusEvent, EventBus, GenerationEventType, MAILBOX_CAPACITY};
