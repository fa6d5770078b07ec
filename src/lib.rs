//! Telematics gateway core: u-blox GNSS control over UBX, gpsd position feed,
//! a shared state store and a bounded telemetry transmit queue.

pub mod gnss;
pub mod gpsd;
pub mod queue;
pub mod state;
pub mod telemetry;
pub mod ubx;
pub mod worker;
