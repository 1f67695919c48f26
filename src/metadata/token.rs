//! Metadata tokens identifying rows of a module's tables.
//!
//! A token packs the table identifier into its high byte and the 1-based row into the low
//! 24 bits. The weaver uses tokens to name the members it references and the attribute
//! occurrences it consumes; the encoder writes them verbatim into the instruction stream.

use std::fmt;
use std::hash::{Hash, Hasher};

/// `TypeRef` table identifier.
pub const TABLE_TYPE_REF: u8 = 0x01;
/// `MethodDef` table identifier.
pub const TABLE_METHOD_DEF: u8 = 0x06;
/// `Param` table identifier.
pub const TABLE_PARAM: u8 = 0x08;
/// `MemberRef` table identifier.
pub const TABLE_MEMBER_REF: u8 = 0x0A;
/// `CustomAttribute` table identifier.
pub const TABLE_CUSTOM_ATTRIBUTE: u8 = 0x0C;
/// `StandAloneSig` table identifier.
pub const TABLE_STANDALONE_SIG: u8 = 0x11;
/// `TypeSpec` table identifier.
pub const TABLE_TYPE_SPEC: u8 = 0x1B;
/// Pseudo-table identifier of the user string heap.
pub const TABLE_USER_STRING: u8 = 0x70;

/// A metadata token: table identifier in the high byte, row in the low 24 bits.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Token(pub u32);

impl Token {
    /// Create a token from its raw value.
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Create a token from a table identifier and a 1-based row.
    #[must_use]
    pub fn from_parts(table: u8, row: u32) -> Self {
        Token((u32::from(table) << 24) | (row & 0x00FF_FFFF))
    }

    /// The raw token value.
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// The table identifier.
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// The 1-based row.
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Returns `true` for the null token.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}
