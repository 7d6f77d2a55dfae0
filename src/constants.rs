/// u16 representations of the single coil states on the wire
pub mod coil {
    /// u16 representation of COIL == ON when performing write single coil
    pub const ON: u16 = 0xFF00;
    /// u16 representation of COIL == OFF when performing write single coil
    pub const OFF: u16 = 0x0000;
}

/// count limits defined in the Modbus specification
pub mod limits {
    /// Maximum count allowed in a read coils/discrete inputs request
    pub const MAX_READ_BITS_COUNT: u16 = 0x07D0;
    /// Maximum count allowed in a read holding/input registers request
    pub const MAX_READ_REGISTERS_COUNT: u16 = 0x007D;
    /// Maximum count allowed in a `write multiple coils` request
    pub const MAX_WRITE_COILS_COUNT: u16 = 0x07B0;
    /// Maximum count allowed in a `write multiple registers` request
    pub const MAX_WRITE_REGISTERS_COUNT: u16 = 0x007B;
    /// Maximum read count allowed in a `read/write multiple registers` request
    pub const MAX_READ_WRITE_READ_COUNT: u16 = 0x007D;
    /// Maximum write count allowed in a `read/write multiple registers` request
    pub const MAX_READ_WRITE_WRITE_COUNT: u16 = 0x0079;
}
