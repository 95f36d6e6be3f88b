pub mod broadcast;
pub mod http;
pub mod metrics;
pub mod pool;
pub mod registration;
pub mod scheduler;
pub mod seed;
pub mod snapshot;
pub mod startup;
pub mod state;

pub use broadcast::{Broadcaster, Frame};
pub use metrics::SimMetrics;
pub use pool::WorkerPool;
pub use scheduler::Master;
pub use state::{SimulationState, StepSlot};
