//! FReD core: a local storage engine, a cached naming-service client, and a
//! mutually-authenticated peering client, tied together by a thin handler
//! that dispatches an already-authorized request to the right subsystem.
//!
//! ## Getting started
//!
//! ```rust
//! use fred_core::error::Error;
//! use fred_core::model::{ItemId, KeygroupName};
//! use fred_core::storage::kvstore::KvStore;
//! use fred_core::storage::memory::Memory;
//!
//! fn run() -> Result<(), Error> {
//!     let store = KvStore::new(Memory::new());
//!     let kg = KeygroupName::new("greetings")?;
//!
//!     store.create_keygroup(&kg)?;
//!     let id = store.append(&kg, "hello", 0)?;
//!     assert_eq!(store.read(&kg, &id)?, "hello");
//!
//!     store.delete_keygroup(&kg)?;
//!     assert!(!store.exists_keygroup(&kg)?);
//!     Ok(())
//! }
//!
//! run().unwrap();
//! ```

pub mod config;
pub mod error;
pub mod handler;
pub mod model;
pub mod naming;
pub mod peering;
pub mod storage;

pub mod fred_proto {
    tonic::include_proto!("fred");
}
