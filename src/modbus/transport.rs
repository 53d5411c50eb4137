use crate::error::TransportError;
use crate::modbus::frame::{ClientCodec, Request, RequestFrame, Response};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use log::{debug, info, trace, warn};
use net2::TcpStreamExt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

const TCP_KEEPALIVE_SECS: u64 = 60;

/// One established Modbus link. Callers serialize access; implementations
/// never see two transactions at once.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn read_holding_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>, TransportError>;

    async fn write_single_register(&mut self, address: u16, value: u16) -> Result<(), TransportError>;

    async fn write_multiple_registers(&mut self, address: u16, values: &[u16]) -> Result<(), TransportError>;

    async fn close(&mut self) {}
}

/// Opens new [`Transport`]s for one device.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError>;

    fn peer(&self) -> String;
}

#[derive(Clone, Debug)]
pub struct TcpConnector {
    host: String,
    port: u16,
    unit_id: u8,
    timeout: Duration,
}

impl TcpConnector {
    pub fn new(host: &str, port: u16, unit_id: u8, timeout: Duration) -> Self {
        Self {
            host: host.to_owned(),
            port,
            unit_id,
            timeout,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError> {
        debug!("connecting to {}", self.peer());

        let stream = match tokio::time::timeout(self.timeout, TcpStream::connect((self.host.as_str(), self.port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(TransportError::Timeout(self.timeout)),
        };

        let std_stream = stream.into_std()?;
        if let Err(e) = std_stream.set_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS))) {
            warn!("{}: failed to set TCP keepalive: {}", self.peer(), e);
        }
        let stream = TcpStream::from_std(std_stream)?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!("{}: failed to set TCP_NODELAY: {}", self.peer(), e);
        }

        info!("connected to {} (unit {})", self.peer(), self.unit_id);

        Ok(Box::new(TcpTransport {
            framed: Framed::new(stream, ClientCodec),
            unit_id: self.unit_id,
            transaction_id: 0,
        }))
    }

    fn peer(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

pub struct TcpTransport {
    framed: Framed<TcpStream, ClientCodec>,
    unit_id: u8,
    transaction_id: u16,
}

impl TcpTransport {
    async fn call(&mut self, request: Request) -> Result<Response, TransportError> {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        let transaction_id = self.transaction_id;

        trace!("tx {} {:?}", transaction_id, request);
        self.framed
            .send(RequestFrame {
                transaction_id,
                unit_id: self.unit_id,
                request,
            })
            .await?;

        loop {
            match self.framed.next().await {
                None => return Err(TransportError::Closed),
                Some(Err(e)) => return Err(e.into()),
                // a late reply to a transaction we already gave up on
                Some(Ok(frame)) if frame.transaction_id != transaction_id => {
                    debug!(
                        "discarding response for transaction {} while waiting for {}",
                        frame.transaction_id, transaction_id
                    );
                }
                Some(Ok(frame)) => {
                    trace!("rx {} {:?}", frame.transaction_id, frame.response);
                    return match frame.response {
                        Response::Exception { function, code } => Err(TransportError::Exception { function, code }),
                        response => Ok(response),
                    };
                }
            }
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn read_holding_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>, TransportError> {
        match self.call(Request::ReadHoldingRegisters { address, count }).await? {
            Response::ReadHoldingRegisters(values) if values.len() == count as usize => Ok(values),
            other => Err(TransportError::Protocol(format!(
                "read {} registers at {:#06x}: unexpected response {:?}",
                count, address, other
            ))),
        }
    }

    async fn write_single_register(&mut self, address: u16, value: u16) -> Result<(), TransportError> {
        match self.call(Request::WriteSingleRegister { address, value }).await? {
            Response::WriteSingleRegister { address: a, value: v } if a == address && v == value => Ok(()),
            other => Err(TransportError::Protocol(format!(
                "write {:#06x}: unexpected response {:?}",
                address, other
            ))),
        }
    }

    async fn write_multiple_registers(&mut self, address: u16, values: &[u16]) -> Result<(), TransportError> {
        let request = Request::WriteMultipleRegisters {
            address,
            values: values.to_vec(),
        };
        match self.call(request).await? {
            Response::WriteMultipleRegisters { address: a, count } if a == address && count as usize == values.len() => {
                Ok(())
            }
            other => Err(TransportError::Protocol(format!(
                "write {:#06x} ({} registers): unexpected response {:?}",
                address,
                values.len(),
                other
            ))),
        }
    }

    async fn close(&mut self) {
        if let Err(e) = SinkExt::<RequestFrame>::close(&mut self.framed).await {
            debug!("error closing modbus socket: {}", e);
        }
    }
}
