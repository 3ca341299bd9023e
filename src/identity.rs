/*!
    manufacturing identity of the boards, written once in each unit and never changed
*/

use core::fmt;
use packbytes::{FromBytes, ToBytes};


/// kind of board, as programmed at manufacture
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BoardType(pub u16);

impl BoardType {
    pub const CORE: Self = Self(3);
    pub const CORE_LITE: Self = Self(4);
    pub const DISCRETE: Self = Self(6);
    pub const DISCRETE_VE: Self = Self(7);
    pub const MIXED: Self = Self(8);
    pub const RELAY_LP: Self = Self(9);
    pub const RELAY_HP: Self = Self(10);
    pub const STEPPER: Self = Self(11);
    pub const STEPPER_VE: Self = Self(12);
    pub const ANALOG_LS: Self = Self(13);
    pub const BRUSHLESS: Self = Self(18);
    pub const DC: Self = Self(21);

    pub fn name(self) -> &'static str {
        match self {
            Self::CORE => "OICore",
            Self::CORE_LITE => "OICoreLite",
            Self::DISCRETE => "OIDiscrete",
            Self::DISCRETE_VE => "OIDiscreteVE",
            Self::MIXED => "OIMixed",
            Self::RELAY_LP => "OIRelayLP",
            Self::RELAY_HP => "OIRelayHP",
            Self::STEPPER => "OIStepper",
            Self::STEPPER_VE => "OIStepperVE",
            Self::ANALOG_LS => "OIAnalogLS",
            Self::BRUSHLESS => "OIBrushless",
            Self::DC => "OIDc",
            _ => "Unknown",
        }
    }
    /**
        whether a board detected as `other` can serve where `self` is declared

        variants of the same board share their command set, so they are interchangeable
    */
    pub fn is_compatible(self, other: Self) -> bool {
        self.family() == other.family()
    }
    fn family(self) -> Self {
        match self {
            Self::CORE_LITE => Self::CORE,
            Self::DISCRETE_VE => Self::DISCRETE,
            Self::STEPPER_VE => Self::STEPPER,
            other => other,
        }
    }
}
impl fmt::Display for BoardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.0)
    }
}
impl ToBytes for BoardType {
    type Bytes = [u8; 2];
    fn to_le_bytes(self) -> Self::Bytes {self.0.to_le_bytes()}
    fn to_be_bytes(self) -> Self::Bytes {self.0.to_be_bytes()}
}
impl FromBytes for BoardType {
    type Bytes = [u8; 2];
    fn from_le_bytes(bytes: Self::Bytes) -> Self {Self(u16::from_le_bytes(bytes))}
    fn from_be_bytes(bytes: Self::Bytes) -> Self {Self(u16::from_be_bytes(bytes))}
}


/// what a node announces to be found: carried by pings and discovery answers
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromBytes, ToBytes)]
pub struct Signature {
    pub board_type: BoardType,
    pub serial_number: u32,
}

/// full identity of a unit
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromBytes, ToBytes)]
pub struct Identity {
    pub board_type: BoardType,
    pub serial_number: u32,
    pub hardware_version: [u8; 4],
    /// manufacture date, in seconds since unix epoch
    pub timestamp: i64,
}
impl Identity {
    pub fn signature(&self) -> Signature {
        Signature {
            board_type: self.board_type,
            serial_number: self.serial_number,
        }
    }
}

/// answer to a board info request
#[derive(Clone, Debug, PartialEq, Eq, FromBytes, ToBytes)]
pub struct BoardInfo {
    pub identity: Identity,
    pub software_version: StringArray,
}

/// fixed size string
#[derive(Clone, Debug, Default, PartialEq, Eq, FromBytes, ToBytes)]
pub struct StringArray {
    pub size: u8,
    pub buffer: [u8; 31],
}
impl TryFrom<&str> for StringArray {
    type Error = &'static str;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let value = value.as_bytes();
        let mut dst = Self::default();
        if value.len() > dst.buffer.len()
            {return Err("input string too long");}
        dst.size = value.len() as u8;
        dst.buffer[..value.len()] .copy_from_slice(value);
        Ok(dst)
    }
}
impl StringArray {
    pub fn as_str(&self) -> Result<&'_ str, core::str::Utf8Error> {
        let size = usize::from(self.size).min(self.buffer.len());
        core::str::from_utf8(&self.buffer[.. size])
    }
}
