//! Query assembly and transport dispatch for the `qlook` DNS lookup tool.
//!
//! [`query::create_queries()`] turns resolved [`options::Options`] into query messages,
//! [`transport::new_transport()`] picks the transport for a server and protocol, and
//! [`lookup::lookup_all()`] runs one session per server and collects the results into
//! [`entry::Entry`] values.

pub mod edns;
pub mod entry;
pub mod error;
pub mod lookup;
pub mod net;
pub mod options;
pub mod query;
pub mod transport;

pub use entry::Entry;
pub use error::ConfigError;
