pub mod client;

pub use client::PeeringClient;
