pub mod backend_events;
pub mod connectors;
pub mod jobs;
