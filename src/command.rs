/*!
    vocabulary shared by master and slaves: bus commands, generic request sub-opcodes, event and error codes
*/

use bilge::prelude::*;

use crate::pack_bilge;


/// command carried by a point-to-point frame or in the first byte of a broadcast frame
#[bitsize(8)]
#[derive(Copy, Clone, FromBits, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    /// does nothing, can be used to probe the bus
    Nop = 0x00,
    /// ask a slave to reboot
    Restart = 0x01,
    /// find the node matching a board type and serial number
    Ping = 0x02,
    /// set the slave's status LED
    LedStatus = 0x03,
    /// ask every slave to announce its identity on the broadcast bus
    Discover = 0x04,
    /// read identity and software version
    BoardInfo = 0x05,
    /// generic request tunnel, the payload starts with a sub-opcode owned by a peripheral driver
    Request = 0x06,
    /// event emitted by a slave on the broadcast bus
    Event = 0x07,
    RelayBegin = 0x08,
    RelayWrite = 0x09,
    RelayCheck = 0x0A,
    RelayEnd = 0x0B,
    ReadRegister = 0x0C,
    Heartbeat = 0x10,
    /// ask slaves to run their reset hooks
    Reset = 0x11,
    /// error emitted by a slave on the broadcast bus
    Error = 0x12,
    #[fallback]
    Unknown = 0xFF,
}
pack_bilge!(Command, u8);


/// functional areas partitioning the generic request sub-opcode space
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Area {
    Digital,
    Analog,
    Stepper,
    Brushless,
    Encoder,
    Dc,
    Sensor,
    Unassigned,
}
impl Area {
    /// area owning the given sub-opcode
    pub fn of(opcode: u8) -> Self {
        match opcode {
            0x00 ..= 0x1F => Self::Digital,
            0x20 ..= 0x3F => Self::Analog,
            0x40 ..= 0x5F => Self::Stepper,
            0x60 ..= 0x7F => Self::Brushless,
            0x80 ..= 0x9F => Self::Encoder,
            0xA0 ..= 0xAF => Self::Dc,
            0xB0 ..= 0xBF => Self::Sensor,
            _ => Self::Unassigned,
        }
    }
}

/// sub-opcodes of the generic request tunnel known by the stock peripheral drivers
pub mod request {
    pub const DIGITAL_WRITE: u8 = 0x00;
    pub const DIGITAL_TOGGLE: u8 = 0x01;
    pub const DIGITAL_MODE_SET: u8 = 0x02;
    pub const DIGITAL_MODE_GET: u8 = 0x03;
    pub const DIGITAL_READ: u8 = 0x04;
    pub const DIGITAL_ATTACH_INTERRUPT: u8 = 0x05;
    pub const DIGITAL_DETACH_INTERRUPT: u8 = 0x06;
    pub const DIGITAL_GET_OUTPUT_LEVEL: u8 = 0x07;
    pub const DIGITAL_GET_CURRENT: u8 = 0x08;
    pub const DIGITAL_SET_OVERCURRENT_THRESHOLD: u8 = 0x09;
    pub const DIGITAL_SET_OVERCURRENT_CALLBACK: u8 = 0x0A;
    pub const DIGITAL_RESET_OVERCURRENT_CALLBACK: u8 = 0x0B;
    pub const DIGITAL_SET_PWM: u8 = 0x0C;

    pub const ANALOG_READ: u8 = 0x20;
    pub const ANALOG_READ_MILLIVOLT: u8 = 0x21;
    pub const ANALOG_SET_MODE: u8 = 0x22;
    pub const ANALOG_GET_MODE: u8 = 0x23;
    pub const ANALOG_SET_VOLTAGE_RANGE: u8 = 0x24;
    pub const ANALOG_GET_VOLTAGE_RANGE: u8 = 0x25;
    pub const ANALOG_WRITE: u8 = 0x26;
    pub const ANALOG_READ_RAW: u8 = 0x27;
    pub const ANALOG_READ_VOLT: u8 = 0x28;
    pub const ANALOG_READ_AMPERE: u8 = 0x29;
    pub const ANALOG_SET_CURRENT_MODE: u8 = 0x2A;

    pub const STEPPER_READ_STATE: u8 = 0x40;
    pub const STEPPER_ATTACH_LIMIT_SWITCH: u8 = 0x41;
    pub const STEPPER_DETACH_LIMIT_SWITCH: u8 = 0x42;
    pub const STEPPER_SET_STEP_RESOLUTION: u8 = 0x43;
    pub const STEPPER_SET_ACCELERATION: u8 = 0x44;
    pub const STEPPER_SET_DECELERATION: u8 = 0x45;
    pub const STEPPER_SET_MAX_SPEED: u8 = 0x46;
    pub const STEPPER_SET_MIN_SPEED: u8 = 0x47;
    pub const STEPPER_SET_FULL_STEP_SPEED: u8 = 0x48;
    pub const STEPPER_GET_POSITION: u8 = 0x49;
    pub const STEPPER_GET_SPEED: u8 = 0x4A;
    pub const STEPPER_RESET_HOME_POSITION: u8 = 0x4B;
    pub const STEPPER_SET_POSITION: u8 = 0x4C;
    pub const STEPPER_STOP: u8 = 0x4D;
    pub const STEPPER_MOVE_ABSOLUTE: u8 = 0x4E;
    pub const STEPPER_MOVE_RELATIVE: u8 = 0x4F;
    pub const STEPPER_RUN: u8 = 0x50;
    pub const STEPPER_WAIT: u8 = 0x51;
    pub const STEPPER_HOMING: u8 = 0x52;
    pub const STEPPER_SET_ADVANCED_PARAM: u8 = 0x53;
    pub const STEPPER_GET_ADVANCED_PARAM: u8 = 0x54;
    pub const STEPPER_GET_STATUS: u8 = 0x55;
    pub const STEPPER_CLEAR_STATUS: u8 = 0x56;

    pub const BRUSHLESS_SET_SPEED: u8 = 0x60;
    pub const BRUSHLESS_SET_BRAKE: u8 = 0x61;
    pub const BRUSHLESS_SET_DIRECTION: u8 = 0x62;

    pub const ENCODER_ATTACH: u8 = 0x80;
    pub const ENCODER_DETACH: u8 = 0x81;
    pub const ENCODER_RESET: u8 = 0x82;
    pub const ENCODER_GET_REVOLUTIONS: u8 = 0x83;
    pub const ENCODER_GET_PULSES: u8 = 0x84;
    pub const ENCODER_GET_ANGLE: u8 = 0x85;
    pub const ENCODER_GET_SPEED: u8 = 0x86;

    pub const DC_RUN: u8 = 0xA0;
    pub const DC_STOP: u8 = 0xA1;

    pub const SENSOR_INIT: u8 = 0xB0;
    pub const SENSOR_START: u8 = 0xB1;
    pub const SENSOR_STOP: u8 = 0xB2;
    pub const SENSOR_READ: u8 = 0xB3;
    pub const SENSOR_READ_RAW: u8 = 0xB4;
    pub const SENSOR_READ_MILLIVOLT: u8 = 0xB5;
    pub const SENSOR_READ_TEMPERATURE: u8 = 0xB6;
}

/// event codes, first argument byte of a broadcast event
pub mod event {
    pub const DIGITAL_INTERRUPT: u8 = 0x00;
    pub const OVERCURRENT: u8 = 0x01;
    pub const MOTOR_READY: u8 = 0x01;
    pub const MOTOR_FLAG_INTERRUPT: u8 = 0x02;
    pub const SENSOR_READ: u8 = 0xB0;
    pub const SENSOR_READ_1: u8 = 0xB1;
    pub const SENSOR_READ_2: u8 = 0xB2;
    pub const SENSOR_READ_3: u8 = 0xB3;
    pub const SENSOR_READ_4: u8 = 0xB4;
}

/// error code carried by a broadcast error
#[bitsize(8)]
#[derive(Copy, Clone, FromBits, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    None = 0,
    Boot = 1,
    ModuleInit = 2,
    AutoId = 3,
    #[fallback]
    Unknown = 0xFF,
}
pack_bilge!(ErrorCode, u8);
