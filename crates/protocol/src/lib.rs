pub mod connector;
pub mod framing;
pub mod wire;

pub use connector::{ConnectionState, Connector};
pub use framing::{encode_frame, FrameCodec};
pub use wire::{ServerInfo, ToolDescriptor};
