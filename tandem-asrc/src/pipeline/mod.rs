//! Clock-domain-crossing pipeline
//!
//! Worker pools, clock recovery, the two endpoints and the stream manager
//! that ties them together.

pub mod clock;
pub mod controller;
pub mod endpoint;
pub mod manager;
pub mod pool;
pub mod worker;

pub use clock::{tick_delta, HardwareClock, RateEstimator, TickCounter};
pub use controller::{ClockRecovery, ControllerSettings, CycleOutcome, Occupancy};
pub use endpoint::{hardware_channel, host_channel, HandoffMode, HardwarePort, HostPort};
pub use manager::{CycleReport, EpochEnd, EpochSummary, StreamManager};
pub use pool::{partition_channels, WorkerPool};
