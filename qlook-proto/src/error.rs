//! Error types for parsing and encoding DNS messages.

use thiserror::Error;

use crate::Name;

/// Errors that may arise during parsing.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid opcode: valid are 0 to 2 and 4 to 6, got {0}.")]
    InvalidOpcode(u8),

    #[error("Invalid name in OPT record: must be root, is {0}.")]
    InvalidOptName(Name),

    #[error("Invalid name length: must be smaller than 255, is {0}.")]
    NameTooLong(usize),

    #[error("Invalid label length in name: must be smaller than 64, is {0}.")]
    LabelTooLong(usize),

    #[error("Invalid name: labels must contain only a-z, A-Z, 0-9, underscores, and hyphens, and must not start or end with a hyphen.")]
    NameInvalidChars,

    #[error("Invalid name: contains an empty label.")]
    EmptyLabel,

    #[error("Invalid label type: must be 192 (i.e. extended) or 0, is {0}.")]
    InvalidLabelType(u8),

    #[error("Too many compression pointers in name: at most {0} are followed.")]
    CompressionLoop(usize),

    #[error("Invalid RDATA length for {0}: expected {1}, got {2}.")]
    RdataLength(crate::RecordType, u16, u16),

    #[error("Invalid EDNS option length for option {0}: got {1} bytes.")]
    OptionLength(u16, u16),

    #[error("Invalid client subnet family: must be 1 or 2, is {0}.")]
    SubnetFamily(u16),

    #[error("Encountered name compression where it is explicitly prohibited.")]
    CompressionProhibited,

    #[error("IO error.")]
    IoError(#[from] std::io::Error),
}

/// Errors that may arise during encoding.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("Domain name too long: allowed are up to 255 bytes, got {0}.")]
    DomainTooLong(usize),

    #[error("Label too long: allowed are up to 63 bytes, got {0}.")]
    LabelTooLong(usize),

    #[error("Character string too long: allowed are up to 255 bytes, got {0}.")]
    StringTooLong(usize),

    #[error("Invalid client subnet: prefix {0} is too long for address family {1}.")]
    SubnetPrefix(u8, u16),

    #[error("EDNS option too long: {0} bytes do not fit into an option.")]
    OptionTooLong(usize),

    #[error("IO error.")]
    IoError(#[from] std::io::Error),
}
