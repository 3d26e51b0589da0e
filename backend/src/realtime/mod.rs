pub mod protocol;
pub mod registry;
pub mod relay;

pub use protocol::{ClientEnvelope, ServerEnvelope};
pub use registry::{ConnectionRegistry, InProcessRegistry, OutboundSender, RegistryError};
pub use relay::SignalingRelay;
