pub mod cache;
pub mod client;
pub mod coordination_store;
pub mod etcd_store;
pub mod key;

pub use client::NamingClient;
pub use coordination_store::CoordinationStore;
