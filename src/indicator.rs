/*!
    status LED of the boards, the only feedback available on a deployed unit without a log connection
*/

/// LED colour, bits are the red, green and blue channels
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Color {
    None = 0,
    Red = 1,
    Green = 2,
    Yellow = 3,
    Blue = 4,
    Purple = 5,
    Cyan = 6,
    White = 7,
}
impl From<u8> for Color {
    fn from(value: u8) -> Self {
        match value & 0b111 {
            1 => Self::Red,
            2 => Self::Green,
            3 => Self::Yellow,
            4 => Self::Blue,
            5 => Self::Purple,
            6 => Self::Cyan,
            7 => Self::White,
            _ => Self::None,
        }
    }
}

/// state of a status LED
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LedStatus {
    On(Color),
    Off,
    /// blink with the given period in milliseconds
    Blink(Color, u32),
}
impl LedStatus {
    /// size of an encoded status: state, colour and period
    pub const SIZE: usize = 6;

    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let (state, color, period) = match self {
            Self::On(color) => (0, color, 0),
            Self::Off => (1, Color::None, 0),
            Self::Blink(color, period) => (2, color, period),
        };
        let period = period.to_le_bytes();
        [state, color as u8, period[0], period[1], period[2], period[3]]
    }
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; Self::SIZE] = crate::utils::array(bytes)?;
        let color = Color::from(bytes[1]);
        match bytes[0] {
            0 => Some(Self::On(color)),
            1 => Some(Self::Off),
            2 => Some(Self::Blink(color, u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]))),
            _ => None,
        }
    }
}

/// something able to display a [LedStatus]
pub trait Indicator {
    fn show(&mut self, status: LedStatus);
}
/// no indicator at all
impl Indicator for () {
    fn show(&mut self, _: LedStatus) {}
}

/// fault classes, each one has its own pattern so it can be told apart on a deployed unit
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Fault {
    /// bus read or write failed
    Transport,
    /// no answer came in time
    Timeout,
    /// auto addressing aborted
    Addressing,
    /// a generic request had no registered handler
    UnknownOpcode,
    /// a firmware relay session was aborted
    RelayAbort,
}
impl Fault {
    pub fn led(self) -> LedStatus {
        match self {
            Self::Transport => LedStatus::Blink(Color::Red, 1000),
            Self::Timeout => LedStatus::Blink(Color::Red, 250),
            Self::Addressing => LedStatus::On(Color::Red),
            Self::UnknownOpcode => LedStatus::Blink(Color::Purple, 500),
            Self::RelayAbort => LedStatus::Blink(Color::Red, 100),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding() {
        assert_eq!(LedStatus::Blink(Color::Green, 1000).to_bytes(), [2, 2, 0xE8, 0x03, 0, 0]);
        assert_eq!(LedStatus::On(Color::Yellow).to_bytes()[..2], [0, 3]);
        for status in [LedStatus::Off, LedStatus::On(Color::Cyan), LedStatus::Blink(Color::White, 70_000)] {
            assert_eq!(LedStatus::from_bytes(&status.to_bytes()), Some(status));
        }
        assert_eq!(LedStatus::from_bytes(&[3, 0, 0, 0, 0, 0]), None);
        assert_eq!(LedStatus::from_bytes(&[0, 1]), None);
    }

    #[test]
    fn faults_are_distinct() {
        let faults = [Fault::Transport, Fault::Timeout, Fault::Addressing, Fault::UnknownOpcode, Fault::RelayAbort];
        for (i, a) in faults.iter().enumerate() {
            for b in &faults[i+1 ..] {
                assert_ne!(a.led(), b.led());
            }
        }
    }
}
