//! Typed resource record payloads
//!
//! One variant per supported wire type. Each variant knows its exact
//! encoded size (needed for the two-pass RDATA length patch and the UDP
//! truncation check), how to (de)serialize itself, and how to build itself
//! from text, which is how both the zone-file loader and script results
//! hand values in.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use thiserror::Error;

use crate::types::RecordType;
use crate::wire::{name_len, WireCursor, WireError, MAX_STRING_LEN};

#[derive(Debug, Error)]
pub enum RdataError {
    #[error("invalid {0} data '{1}'")]
    InvalidData(&'static str, String),
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Text input for a payload: a single string or an ordered list of
/// strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextData {
    Value(String),
    List(Vec<String>),
}

impl TextData {
    /// The first string, whichever shape carries it.
    pub fn first(&self) -> Option<&str> {
        match self {
            TextData::Value(v) => Some(v.as_str()),
            TextData::List(list) => list.first().map(|s| s.as_str()),
        }
    }

    fn require_first(&self, what: &'static str) -> Result<&str, RdataError> {
        self.first()
            .ok_or_else(|| RdataError::InvalidData(what, String::new()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoaData {
    pub mname: String,
    pub rname: String,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rdata {
    A { addr: Ipv4Addr },
    AAAA { addr: Ipv6Addr },
    NS { nsdname: String },
    CNAME { cname: String },
    PTR { ptrdname: String },
    MX { preference: u16, exchange: String },
    SOA(SoaData),
    TXT { text: String },
    NULL { data: Vec<u8> },
    /// Opaque payload for type codes outside the supported set; only ever
    /// produced by the decoder.
    Generic { data: Vec<u8> },
}

impl Rdata {
    pub fn rtype(&self) -> RecordType {
        match self {
            Rdata::A { .. } => RecordType::A,
            Rdata::AAAA { .. } => RecordType::AAAA,
            Rdata::NS { .. } => RecordType::NS,
            Rdata::CNAME { .. } => RecordType::CNAME,
            Rdata::PTR { .. } => RecordType::PTR,
            Rdata::MX { .. } => RecordType::MX,
            Rdata::SOA(_) => RecordType::SOA,
            Rdata::TXT { .. } => RecordType::TXT,
            Rdata::NULL { .. } => RecordType::NULL,
            Rdata::Generic { .. } => RecordType::None,
        }
    }

    /// Exact length of the serialized payload in octets.
    pub fn size(&self) -> usize {
        match self {
            Rdata::A { .. } => 4,
            Rdata::AAAA { .. } => 16,
            Rdata::NS { nsdname } => name_len(nsdname),
            Rdata::CNAME { cname } => name_len(cname),
            Rdata::PTR { ptrdname } => name_len(ptrdname),
            Rdata::MX { exchange, .. } => 2 + name_len(exchange),
            Rdata::SOA(soa) => name_len(&soa.mname) + name_len(&soa.rname) + 5 * 4,
            Rdata::TXT { text } => text.len() + 1,
            Rdata::NULL { data } => data.len(),
            Rdata::Generic { data } => data.len(),
        }
    }

    pub fn serialize(&self, w: &mut WireCursor) -> Result<(), WireError> {
        match self {
            Rdata::A { addr } => w.write_bytes(&addr.octets()),
            Rdata::AAAA { addr } => w.write_bytes(&addr.octets()),
            Rdata::NS { nsdname } => w.write_name(nsdname)?,
            Rdata::CNAME { cname } => w.write_name(cname)?,
            Rdata::PTR { ptrdname } => w.write_name(ptrdname)?,
            Rdata::MX { preference, exchange } => {
                w.write_u16(*preference);
                w.write_name(exchange)?;
            }
            Rdata::SOA(soa) => {
                w.write_name(&soa.mname)?;
                w.write_name(&soa.rname)?;
                w.write_u32(soa.serial);
                w.write_u32(soa.refresh);
                w.write_u32(soa.retry);
                w.write_u32(soa.expire);
                w.write_u32(soa.minimum);
            }
            Rdata::TXT { text } => w.write_prefixed_string(text, MAX_STRING_LEN)?,
            Rdata::NULL { data } => w.write_bytes(data),
            Rdata::Generic { data } => w.write_bytes(data),
        }
        Ok(())
    }

    /// Decodes a payload of `size` octets for the given type. Type codes
    /// outside the supported set decode as an opaque `Generic` payload.
    pub fn deserialize(rtype: RecordType, r: &mut WireCursor, size: usize) -> Result<Rdata, WireError> {
        match rtype {
            RecordType::A | RecordType::AAAA => {
                // 地址族由负载长度决定: 4 字节 IPv4, 16 字节 IPv6
                let bytes = r.read_exact(size)?;
                if let Ok(octets) = <[u8; 4]>::try_from(bytes) {
                    Ok(Rdata::A { addr: Ipv4Addr::from(octets) })
                } else if let Ok(octets) = <[u8; 16]>::try_from(bytes) {
                    Ok(Rdata::AAAA { addr: Ipv6Addr::from(octets) })
                } else {
                    Err(WireError::BadPayload("address", size))
                }
            }
            RecordType::NS => Ok(Rdata::NS { nsdname: r.read_name()? }),
            RecordType::CNAME => Ok(Rdata::CNAME { cname: r.read_name()? }),
            RecordType::PTR => Ok(Rdata::PTR { ptrdname: r.read_name()? }),
            RecordType::MX => Ok(Rdata::MX {
                preference: r.read_u16()?,
                exchange: r.read_name()?,
            }),
            RecordType::SOA => Ok(Rdata::SOA(SoaData {
                mname: r.read_name()?,
                rname: r.read_name()?,
                serial: r.read_u32()?,
                refresh: r.read_u32()?,
                retry: r.read_u32()?,
                expire: r.read_u32()?,
                minimum: r.read_u32()?,
            })),
            RecordType::TXT => Ok(Rdata::TXT { text: r.read_prefixed_string()? }),
            RecordType::NULL => Ok(Rdata::NULL { data: r.read_exact(size)?.to_vec() }),
            _ => Ok(Rdata::Generic { data: r.read_exact(size)?.to_vec() }),
        }
    }

    /// Builds a payload of the given type from text. This is the closed
    /// type-code registry: every supported constructor is listed here.
    pub fn parse_from_text(rtype: RecordType, data: &TextData) -> Result<Rdata, RdataError> {
        match rtype {
            RecordType::A | RecordType::AAAA => {
                let value = data.require_first("address")?;
                let addr: IpAddr = value
                    .parse()
                    .map_err(|_| RdataError::InvalidData("address", value.to_string()))?;
                Ok(match addr {
                    IpAddr::V4(addr) => Rdata::A { addr },
                    IpAddr::V6(addr) => Rdata::AAAA { addr },
                })
            }
            RecordType::NS => Ok(Rdata::NS { nsdname: data.require_first("NS")?.to_string() }),
            RecordType::CNAME => Ok(Rdata::CNAME { cname: data.require_first("CNAME")?.to_string() }),
            RecordType::PTR => Ok(Rdata::PTR { ptrdname: data.require_first("PTR")?.to_string() }),
            RecordType::MX => {
                let TextData::List(values) = data else {
                    return Err(RdataError::InvalidData("MX", format!("{:?}", data)));
                };
                if values.len() < 2 {
                    return Err(RdataError::InvalidData("MX", values.join(" ")));
                }
                let preference = values[0]
                    .parse()
                    .map_err(|_| RdataError::InvalidData("MX", values[0].clone()))?;
                Ok(Rdata::MX { preference, exchange: values[1].clone() })
            }
            RecordType::SOA => {
                let TextData::List(values) = data else {
                    return Err(RdataError::InvalidData("SOA", format!("{:?}", data)));
                };
                if values.len() < 7 {
                    return Err(RdataError::InvalidData("SOA", values.join(" ")));
                }
                let number = |v: &String| {
                    v.parse::<u32>()
                        .map_err(|_| RdataError::InvalidData("SOA", v.clone()))
                };
                Ok(Rdata::SOA(SoaData {
                    mname: values[0].clone(),
                    rname: values[1].clone(),
                    serial: number(&values[2])?,
                    refresh: number(&values[3])?,
                    retry: number(&values[4])?,
                    expire: number(&values[5])?,
                    minimum: number(&values[6])?,
                }))
            }
            RecordType::TXT => Ok(Rdata::TXT { text: data.require_first("TXT")?.to_string() }),
            RecordType::NULL => {
                let value = data.require_first("NULL")?;
                let stripped = value.strip_prefix("0x").unwrap_or(value);
                let bytes = hex::decode(stripped)
                    .map_err(|_| RdataError::InvalidData("NULL", value.to_string()))?;
                Ok(Rdata::NULL { data: bytes })
            }
            _ => Err(RdataError::InvalidData("record type", rtype.name().to_string())),
        }
    }
}
