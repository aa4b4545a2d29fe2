//! Client side of the control plane: the connection descriptor, the HTTP
//! client and the log tailer.

pub mod descriptor;
pub mod http;
pub mod tail;

pub use descriptor::{generate_token, Descriptor};
pub use http::MotherShipClient;
