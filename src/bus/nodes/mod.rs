//! Built-in node implementations.

pub mod driver_call;
pub mod echo;

pub use driver_call::DriverNode;
pub use echo::EchoNode;
