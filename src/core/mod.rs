pub mod connection;
pub mod discovery;
pub mod filters;
pub mod monitor;
pub mod ping;
pub mod process;
pub mod utils;
