//! DNS message framing
//!
//! A message is the 12-octet header followed by the query, answer,
//! authority and additional sections. Section counts on the wire always
//! mirror the in-memory section lengths.

use crate::rdata::Rdata;
use crate::types::{Rcode, RecordClass, RecordType};
use crate::wire::{name_len, WireCursor, WireError};

/// The 16-bit header flag word, decomposed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeaderFlags {
    /// true for responses
    pub qr: bool,
    pub opcode: u8,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    /// 3-bit reserved field, carried through untouched
    pub z: u8,
    pub rcode: u8,
}

impl HeaderFlags {
    pub fn to_u16(self) -> u16 {
        (self.qr as u16) << 15
            | ((self.opcode & 0x0f) as u16) << 11
            | (self.aa as u16) << 10
            | (self.tc as u16) << 9
            | (self.rd as u16) << 8
            | (self.ra as u16) << 7
            | ((self.z & 0x07) as u16) << 4
            | (self.rcode & 0x0f) as u16
    }

    pub fn from_u16(value: u16) -> HeaderFlags {
        HeaderFlags {
            qr: (value >> 15) & 1 == 1,
            opcode: ((value >> 11) & 0x0f) as u8,
            aa: (value >> 10) & 1 == 1,
            tc: (value >> 9) & 1 == 1,
            rd: (value >> 8) & 1 == 1,
            ra: (value >> 7) & 1 == 1,
            z: ((value >> 4) & 0x07) as u8,
            rcode: (value & 0x0f) as u8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub name: String,
    pub rtype: RecordType,
    pub class: RecordClass,
}

impl Query {
    pub fn serialize(&self, w: &mut WireCursor) -> Result<(), WireError> {
        w.write_name(&self.name)?;
        w.write_u16(self.rtype.code());
        w.write_u16(self.class.code());
        Ok(())
    }

    pub fn deserialize(r: &mut WireCursor) -> Result<Query, WireError> {
        Ok(Query {
            name: r.read_name()?,
            rtype: RecordType::from_code(r.read_u16()?),
            class: RecordClass::from_code(r.read_u16()?),
        })
    }

    pub fn wire_size(&self) -> usize {
        name_len(&self.name) + 4
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub name: String,
    pub rtype: RecordType,
    pub class: RecordClass,
    pub ttl: u32,
    pub rdata: Rdata,
}

impl Answer {
    /// Writes the answer with the mandatory two-pass RDATA length: a
    /// placeholder word, the payload, then a seek back to patch the real
    /// length once it is known.
    pub fn serialize(&self, w: &mut WireCursor) -> Result<(), WireError> {
        w.write_name(&self.name)?;
        w.write_u16(self.rtype.code());
        w.write_u16(self.class.code());
        w.write_u32(self.ttl);

        w.write_u16(0); // RDATA 长度占位, 序列化完负载后回填
        let rdata_start = w.position();
        self.rdata.serialize(w)?;
        let rdata_end = w.position();
        w.seek(rdata_start - 2);
        w.write_u16((rdata_end - rdata_start) as u16);
        w.seek(rdata_end);
        Ok(())
    }

    pub fn deserialize(r: &mut WireCursor) -> Result<Answer, WireError> {
        let name = r.read_name()?;
        let rtype = RecordType::from_code(r.read_u16()?);
        let class = RecordClass::from_code(r.read_u16()?);
        let ttl = r.read_u32()?;
        let size = r.read_u16()? as usize;
        let rdata = Rdata::deserialize(rtype, r, size)?;
        Ok(Answer { name, rtype, class, ttl, rdata })
    }

    pub fn wire_size(&self) -> usize {
        name_len(&self.name) + 2 + 2 + 4 + 2 + self.rdata.size()
    }
}

/// One DNS transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    pub id: u16,
    pub flags: HeaderFlags,
    pub queries: Vec<Query>,
    pub answers: Vec<Answer>,
    pub authority: Vec<Answer>,
    pub additional: Vec<Answer>,
}

impl Message {
    /// Starts a response for this request: same id, same flag word with
    /// the response bit forced on, rcode reset to NoError, empty sections.
    pub fn response(&self) -> Message {
        let mut flags = self.flags;
        flags.qr = true;
        flags.rcode = Rcode::NoError.code();
        Message { id: self.id, flags, ..Message::default() }
    }

    pub fn clear(&mut self) {
        self.queries.clear();
        self.answers.clear();
        self.authority.clear();
        self.additional.clear();
    }

    pub fn serialize(&self, w: &mut WireCursor) -> Result<(), WireError> {
        w.write_u16(self.id);
        w.write_u16(self.flags.to_u16());
        w.write_u16(self.queries.len() as u16);
        w.write_u16(self.answers.len() as u16);
        w.write_u16(self.authority.len() as u16);
        w.write_u16(self.additional.len() as u16);

        for query in &self.queries {
            query.serialize(w)?;
        }
        for answer in &self.answers {
            answer.serialize(w)?;
        }
        for answer in &self.authority {
            answer.serialize(w)?;
        }
        for answer in &self.additional {
            answer.serialize(w)?;
        }
        Ok(())
    }

    pub fn deserialize(r: &mut WireCursor) -> Result<Message, WireError> {
        let id = r.read_u16()?;
        let flags = HeaderFlags::from_u16(r.read_u16()?);
        let qcount = r.read_u16()?;
        let ancount = r.read_u16()?;
        let nscount = r.read_u16()?;
        let arcount = r.read_u16()?;

        if qcount > 1 {
            // RFC-1035 允许多个 query, 但现实中几乎没有实现支持
            tracing::warn!("Nonstandard message ({} queries).", qcount);
        }

        let mut message = Message { id, flags, ..Message::default() };
        for _ in 0..qcount {
            message.queries.push(Query::deserialize(r)?);
        }
        for _ in 0..ancount {
            message.answers.push(Answer::deserialize(r)?);
        }
        for _ in 0..nscount {
            message.authority.push(Answer::deserialize(r)?);
        }
        for _ in 0..arcount {
            message.additional.push(Answer::deserialize(r)?);
        }
        Ok(message)
    }

    /// Serializes to bytes; TCP frames get the 16-bit length prefix.
    pub fn encode(&self, with_length_prefix: bool) -> Result<Vec<u8>, WireError> {
        let size = self.wire_size();
        let mut w = WireCursor::with_capacity(size + if with_length_prefix { 2 } else { 0 });
        if with_length_prefix {
            w.write_u16(size as u16);
        }
        self.serialize(&mut w)?;
        Ok(w.into_bytes())
    }

    pub fn wire_size(&self) -> usize {
        6 * 2 + self.rsection_size()
    }

    /// Size of everything after the header; the UDP path refuses to ship
    /// more than 512 octets of it.
    pub fn rsection_size(&self) -> usize {
        self.queries.iter().map(Query::wire_size).sum::<usize>()
            + self.answers.iter().map(Answer::wire_size).sum::<usize>()
            + self.authority.iter().map(Answer::wire_size).sum::<usize>()
            + self.additional.iter().map(Answer::wire_size).sum::<usize>()
    }
}
