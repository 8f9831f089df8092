//! Consumer side of the search API: submission plus status polling.

pub mod http;
pub mod poller;
