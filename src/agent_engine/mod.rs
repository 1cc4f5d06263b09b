pub mod engine;
pub mod event_bus;
pub mod executor;
pub mod journal;
pub mod loop_control;
pub mod memory;
pub mod planner;
pub mod state;
pub mod verify;
