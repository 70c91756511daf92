pub mod bus;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod protocol;
pub mod shutdown;
pub mod worker;
