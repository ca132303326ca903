pub mod bounds;
pub mod host;
pub mod policy;
pub mod poller;
pub mod registry;
