//! Basic protocol types for redns-rust
//!
//! Numeric values follow the IANA DNS parameter registries.

/// Resource record types this server understands on the wire and in zone
/// files. `None` stands in for type codes outside this set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    None,
    A,
    NS,
    CNAME,
    SOA,
    NULL,
    PTR,
    MX,
    TXT,
    AAAA,
    ALL,
}

impl RecordType {
    pub fn code(self) -> u16 {
        match self {
            RecordType::None => 0,
            RecordType::A => 1,
            RecordType::NS => 2,
            RecordType::CNAME => 5,
            RecordType::SOA => 6,
            RecordType::NULL => 10,
            RecordType::PTR => 12,
            RecordType::MX => 15,
            RecordType::TXT => 16,
            RecordType::AAAA => 28,
            RecordType::ALL => 255,
        }
    }

    pub fn from_code(code: u16) -> RecordType {
        match code {
            1 => RecordType::A,
            2 => RecordType::NS,
            5 => RecordType::CNAME,
            6 => RecordType::SOA,
            10 => RecordType::NULL,
            12 => RecordType::PTR,
            15 => RecordType::MX,
            16 => RecordType::TXT,
            28 => RecordType::AAAA,
            255 => RecordType::ALL,
            _ => RecordType::None,
        }
    }

    /// Case-insensitive lookup used by the zone parser and by scripts that
    /// rewrite the response type.
    pub fn from_name(name: &str) -> Option<RecordType> {
        match name.to_ascii_uppercase().as_str() {
            "A" => Some(RecordType::A),
            "NS" => Some(RecordType::NS),
            "CNAME" => Some(RecordType::CNAME),
            "SOA" => Some(RecordType::SOA),
            "NULL" => Some(RecordType::NULL),
            "PTR" => Some(RecordType::PTR),
            "MX" => Some(RecordType::MX),
            "TXT" => Some(RecordType::TXT),
            "AAAA" => Some(RecordType::AAAA),
            "ALL" | "*" => Some(RecordType::ALL),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RecordType::None => "None",
            RecordType::A => "A",
            RecordType::NS => "NS",
            RecordType::CNAME => "CNAME",
            RecordType::SOA => "SOA",
            RecordType::NULL => "NULL",
            RecordType::PTR => "PTR",
            RecordType::MX => "MX",
            RecordType::TXT => "TXT",
            RecordType::AAAA => "AAAA",
            RecordType::ALL => "ALL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordClass {
    Reserved,
    IN,
    CH,
    HS,
    NONE,
    ANY,
}

impl RecordClass {
    pub fn code(self) -> u16 {
        match self {
            RecordClass::Reserved => 0,
            RecordClass::IN => 1,
            RecordClass::CH => 3,
            RecordClass::HS => 4,
            RecordClass::NONE => 254,
            RecordClass::ANY => 255,
        }
    }

    pub fn from_code(code: u16) -> RecordClass {
        match code {
            1 => RecordClass::IN,
            3 => RecordClass::CH,
            4 => RecordClass::HS,
            254 => RecordClass::NONE,
            255 => RecordClass::ANY,
            _ => RecordClass::Reserved,
        }
    }

    pub fn from_name(name: &str) -> Option<RecordClass> {
        match name.to_ascii_uppercase().as_str() {
            "IN" => Some(RecordClass::IN),
            "CH" => Some(RecordClass::CH),
            "HS" => Some(RecordClass::HS),
            "NONE" => Some(RecordClass::NONE),
            "ANY" | "*" => Some(RecordClass::ANY),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RecordClass::Reserved => "Reserved",
            RecordClass::IN => "IN",
            RecordClass::CH => "CH",
            RecordClass::HS => "HS",
            RecordClass::NONE => "NONE",
            RecordClass::ANY => "ANY",
        }
    }
}

/// Message opcodes. Anything other than `Query` is answered with NotImp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Query = 0,
    IQuery = 1,
    Status = 2,
    Notify = 4,
    Update = 5,
    Dso = 6,
}

impl Opcode {
    pub fn from_code(code: u8) -> Option<Opcode> {
        match code {
            0 => Some(Opcode::Query),
            1 => Some(Opcode::IQuery),
            2 => Some(Opcode::Status),
            4 => Some(Opcode::Notify),
            5 => Some(Opcode::Update),
            6 => Some(Opcode::Dso),
            _ => None,
        }
    }
}

/// Response codes actually produced by this server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rcode {
    NoError = 0,
    FormErr = 1,
    ServFail = 2,
    NXDomain = 3,
    NotImp = 4,
    Refused = 5,
    NotAuth = 9,
    NotZone = 10,
}

impl Rcode {
    pub fn code(self) -> u8 {
        self as u8
    }
}
