/// Built-in components. Each implements `registry::Component` and is
/// registered with the server at startup.
pub mod ble_proxy;
