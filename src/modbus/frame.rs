use bytes::{BufMut, BytesMut};
use nom::multi::length_count;
use nom::number::complete::{be_u16, be_u8};
use nom::sequence::tuple;
use nom::IResult;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

const PROTOCOL_ID: u16 = 0;
// transaction id, protocol id, length, unit id
const MBAP_HEADER_LEN: usize = 7;
// the length field counts the unit id plus the PDU, which is at most 253 bytes
const MAX_LENGTH_FIELD: usize = 254;

pub const MAX_READ_COUNT: u16 = 125;
pub const MAX_WRITE_COUNT: u16 = 123;

#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum FunctionCode {
    ReadHoldingRegisters = 0x03,
    WriteSingleRegister = 0x06,
    WriteMultipleRegisters = 0x10,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    ReadHoldingRegisters { address: u16, count: u16 },
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultipleRegisters { address: u16, values: Vec<u16> },
}

impl Request {
    pub fn function(&self) -> FunctionCode {
        match self {
            Self::ReadHoldingRegisters { .. } => FunctionCode::ReadHoldingRegisters,
            Self::WriteSingleRegister { .. } => FunctionCode::WriteSingleRegister,
            Self::WriteMultipleRegisters { .. } => FunctionCode::WriteMultipleRegisters,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    ReadHoldingRegisters(Vec<u16>),
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultipleRegisters { address: u16, count: u16 },
    Exception { function: u8, code: u8 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestFrame {
    pub transaction_id: u16,
    pub unit_id: u8,
    pub request: Request,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseFrame {
    pub transaction_id: u16,
    pub unit_id: u8,
    pub response: Response,
}

/// Client side of Modbus TCP: encodes requests, decodes responses.
#[derive(Debug, Default)]
pub struct ClientCodec;

impl Encoder<RequestFrame> for ClientCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: RequestFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut pdu = BytesMut::with_capacity(5 + 2 * MAX_WRITE_COUNT as usize);
        pdu.put_u8(frame.request.function().into());

        match &frame.request {
            Request::ReadHoldingRegisters { address, count } => {
                if *count == 0 || *count > MAX_READ_COUNT {
                    return Err(invalid_input(format!("cannot read {} registers", count)));
                }
                pdu.put_u16(*address);
                pdu.put_u16(*count);
            }
            Request::WriteSingleRegister { address, value } => {
                pdu.put_u16(*address);
                pdu.put_u16(*value);
            }
            Request::WriteMultipleRegisters { address, values } => {
                if values.is_empty() || values.len() > MAX_WRITE_COUNT as usize {
                    return Err(invalid_input(format!("cannot write {} registers", values.len())));
                }
                pdu.put_u16(*address);
                pdu.put_u16(values.len() as u16);
                pdu.put_u8((values.len() * 2) as u8);
                for value in values {
                    pdu.put_u16(*value);
                }
            }
        }

        dst.reserve(MBAP_HEADER_LEN + pdu.len());
        dst.put_u16(frame.transaction_id);
        dst.put_u16(PROTOCOL_ID);
        dst.put_u16(pdu.len() as u16 + 1);
        dst.put_u8(frame.unit_id);
        dst.extend_from_slice(&pdu);

        Ok(())
    }
}

impl Decoder for ClientCodec {
    type Item = ResponseFrame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < MBAP_HEADER_LEN {
            return Ok(None);
        }

        let length = u16::from_be_bytes([src[4], src[5]]) as usize;
        if !(2..=MAX_LENGTH_FIELD).contains(&length) {
            return Err(invalid_data(format!("bad MBAP length {}", length)));
        }

        let total = MBAP_HEADER_LEN - 1 + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let adu = src.split_to(total);
        let (_, frame) = parse_response(&adu)
            .map_err(|e| invalid_data(format!("malformed response {:02x?}: {:?}", &adu[..], e)))?;

        Ok(Some(frame))
    }
}

fn parse_response(input: &[u8]) -> IResult<&[u8], ResponseFrame> {
    let (input, (transaction_id, protocol_id, _length, unit_id)) = tuple((be_u16, be_u16, be_u16, be_u8))(input)?;
    if protocol_id != PROTOCOL_ID {
        return Err(nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::Tag)));
    }

    let (input, response) = parse_pdu(input)?;

    Ok((
        input,
        ResponseFrame {
            transaction_id,
            unit_id,
            response,
        },
    ))
}

fn parse_pdu(input: &[u8]) -> IResult<&[u8], Response> {
    let (input, function) = be_u8(input)?;

    if function & 0x80 != 0 {
        let (input, code) = be_u8(input)?;
        return Ok((
            input,
            Response::Exception {
                function: function & 0x7f,
                code,
            },
        ));
    }

    match FunctionCode::try_from(function) {
        Ok(FunctionCode::ReadHoldingRegisters) => {
            let (input, values) = length_count(nom::combinator::map(be_u8, |bytes: u8| bytes / 2), be_u16)(input)?;
            Ok((input, Response::ReadHoldingRegisters(values)))
        }
        Ok(FunctionCode::WriteSingleRegister) => {
            let (input, (address, value)) = tuple((be_u16, be_u16))(input)?;
            Ok((input, Response::WriteSingleRegister { address, value }))
        }
        Ok(FunctionCode::WriteMultipleRegisters) => {
            let (input, (address, count)) = tuple((be_u16, be_u16))(input)?;
            Ok((input, Response::WriteMultipleRegisters { address, count }))
        }
        Err(_) => Err(nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::Switch))),
    }
}

fn invalid_data(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

fn invalid_input(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, message)
}
