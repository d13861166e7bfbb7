//! Upstream realtime protocol: frames, outbound control messages, inbound events

pub mod codec;
pub mod events;
pub mod frame;

pub use codec::{new_event_id, OutboundMessage};
pub use events::ServerEvent;
pub use frame::{Frame, FrameKind};
