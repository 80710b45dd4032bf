pub mod caps;
pub mod message;
pub mod rtsp;

pub use caps::{Capability, NegotiatedConfig, NegotiationError, SinkCaps, SourceCaps};
pub use message::{MessageError, TriggerMethod, WfdMessage};
pub use rtsp::{Method, Request, Response, RtspError, RtspMessage};
