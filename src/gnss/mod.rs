//! u-blox receiver access: transport, driver facade and the supervising worker.

pub mod driver;
pub mod transport;
pub mod worker;

pub use driver::{EsfState, Gnss, UartSettings, Version};
pub use transport::{
    Connector, SerialConnector, TcpConnector, TransportConfig, TransportError, UbxLink,
    UbxTransport,
};
pub use worker::{GnssWorker, SharedGnss};
