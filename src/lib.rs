pub mod ble;
pub mod codec;
pub mod components;
pub mod config;
pub mod error;
pub mod frame;
pub mod proto;
pub mod registry;
pub mod server;
pub mod session;
pub mod worker;
