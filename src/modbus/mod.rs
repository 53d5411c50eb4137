//! Modbus TCP client plumbing: MBAP framing and the transport seam.

pub mod frame;
pub mod transport;

pub use frame::{ClientCodec, FunctionCode, Request, RequestFrame, Response, ResponseFrame};
pub use transport::{Connector, TcpConnector, TcpTransport, Transport};
