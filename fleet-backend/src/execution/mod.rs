pub mod engine;
pub mod lanes;
pub mod tracker;

pub use engine::TaskEngine;
pub use lanes::AccountLaneManager;
pub use tracker::TaskTracker;
