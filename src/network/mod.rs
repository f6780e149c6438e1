mod client;
pub mod realtime;
pub mod store;

pub use client::ChatBackend;
pub use store::RestStore;
