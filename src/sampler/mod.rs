pub mod controller;
pub mod scheduler;

pub use controller::{RunController, RunState, RunStatus};
pub use scheduler::CircularSampler;
