pub mod config;
pub mod echo;
pub mod server;
pub mod shutdown;
pub mod signals;
pub mod supervisor;
