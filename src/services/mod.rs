pub mod durable;
pub mod ephemeral;
pub mod lifecycle;
pub mod notify;
pub mod pipeline;
pub mod runner;
pub mod store;
pub mod testing;
pub mod worker;
