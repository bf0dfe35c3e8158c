//! MongoDB wire protocol constants

/// OP_MSG opcode (MongoDB 3.6+)
pub const OP_MSG: i32 = 2013;

/// Size of the standard message header (length, requestID, responseTo, opCode)
pub const HEADER_LEN: usize = 16;

/// Lowest wire version that speaks OP_MSG (MongoDB 3.6)
pub const MIN_WIRE_VERSION: i32 = 6;

/// Default port for `mongodb://` hosts without an explicit port
pub const DEFAULT_PORT: u16 = 27017;

/// OP_MSG flag bits
pub mod flags {
    /// A CRC-32C checksum follows the sections
    pub const CHECKSUM_PRESENT: u32 = 1 << 0;

    /// Another message follows without a request
    pub const MORE_TO_COME: u32 = 1 << 1;
}

/// OP_MSG section kinds
pub mod section {
    /// Single BSON body document
    pub const BODY: u8 = 0;

    /// Document sequence
    pub const DOCUMENT_SEQUENCE: u8 = 1;
}

/// BSON element type tags
pub mod element {
    /// 64-bit float
    pub const DOUBLE: u8 = 0x01;

    /// UTF-8 string
    pub const STRING: u8 = 0x02;

    /// Embedded document
    pub const DOCUMENT: u8 = 0x03;

    /// Array
    pub const ARRAY: u8 = 0x04;

    /// Binary data
    pub const BINARY: u8 = 0x05;

    /// ObjectId
    pub const OBJECT_ID: u8 = 0x07;

    /// Boolean
    pub const BOOLEAN: u8 = 0x08;

    /// UTC datetime (milliseconds since epoch)
    pub const DATETIME: u8 = 0x09;

    /// Null
    pub const NULL: u8 = 0x0A;

    /// 32-bit integer
    pub const INT32: u8 = 0x10;

    /// Internal timestamp
    pub const TIMESTAMP: u8 = 0x11;

    /// 64-bit integer
    pub const INT64: u8 = 0x12;

    /// 128-bit decimal
    pub const DECIMAL128: u8 = 0x13;

    /// Min key
    pub const MIN_KEY: u8 = 0xFF;

    /// Max key
    pub const MAX_KEY: u8 = 0x7F;
}

/// Binary subtype for generic data (SASL payloads)
pub const BINARY_SUBTYPE_GENERIC: u8 = 0x00;
