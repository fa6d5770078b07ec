//! UBX binary protocol: framing, schemas and typed messages.

pub mod frame;
pub mod messages;
pub mod registry;

pub use frame::{Frame, FrameDecoder, FrameError};
pub use messages::Message;
pub use registry::{Registry, RegistryError, UbxMessage};
