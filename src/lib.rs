pub mod clock;
pub mod config;
pub mod engine;
pub mod events;
pub mod lifecycle;
pub mod limits;
pub mod model;
pub mod observability;
pub mod reaper;
pub mod registry;
pub mod wal;
