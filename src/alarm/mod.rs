pub mod dedup;
pub mod model;
pub mod occurrence;
pub mod ringing;
pub mod scheduler;
pub mod store;
