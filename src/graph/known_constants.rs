//! Well-known system streams and config variables.

use crate::stream::{DataStream, StreamType};

const fn system_input(stream_id: u16) -> DataStream {
    DataStream {
        stream_type: StreamType::Input,
        system: true,
        stream_id,
    }
}

/// Battery voltage in 16.16 fixed point volts, every 10 seconds
pub const BATTERY_VOLTAGE: DataStream = system_input(1);
/// Pushed every 10 seconds with the current tick count
pub const SYSTEM_TICK: DataStream = system_input(2);
pub const FAST_TICK: DataStream = system_input(3);
pub const USER_TICK_1: DataStream = system_input(5);
pub const USER_TICK_2: DataStream = system_input(6);
/// A user connected; the value is the address of the slot it connected through
pub const USER_CONNECT: DataStream = system_input(1025);
pub const USER_DISCONNECT: DataStream = system_input(1026);

/// Bus address of the controller tile
pub const CONTROLLER_ADDRESS: u8 = 8;

/// Interval of the system tick in seconds
pub const SYSTEM_TICK_INTERVAL: u32 = 10;

/// Controller config variable holding the fast tick interval in seconds
pub const CONFIG_FAST_TICK: u16 = 0x2000;
pub const CONFIG_USER_TICK_1: u16 = 0x2002;
pub const CONFIG_USER_TICK_2: u16 = 0x2003;

/// Battery voltage reported by the simulator, 3.6 V in 16.16 fixed point
pub const SIMULATED_BATTERY_VOLTAGE: i32 = (36 * 65536) / 10;
