/// Capacity of the receive ring buffer and of the scratch frame buffer.
/// A Modbus RTU frame never exceeds 256 bytes on the wire.
pub const MAX_BUFFER: usize = 256;

/// Depth of the master telegram queue.
pub const MAX_TELEGRAMS: usize = 2;

/// Shortest request a slave will look at: id, function, two address bytes,
/// two quantity bytes, CRC follows.
pub(crate) const MIN_REQUEST: usize = 7;

/// Shortest response a master will look at.
pub(crate) const MIN_RESPONSE: usize = 6;

/// Wire length of an exception body before the CRC is appended.
pub(crate) const EXCEPTION_LEN: usize = 3;

/// Wire length of an echo response body (single/multiple write) before CRC.
pub(crate) const ECHO_LEN: usize = 6;

/// Supported Modbus function codes.
pub mod fc {
    pub const READ_COILS: u8 = 0x01;
    pub const READ_DISCRETE_INPUTS: u8 = 0x02;
    pub const READ_HOLDING_REGISTERS: u8 = 0x03;
    pub const READ_INPUT_REGISTERS: u8 = 0x04;
    pub const WRITE_SINGLE_COIL: u8 = 0x05;
    pub const WRITE_SINGLE_REGISTER: u8 = 0x06;
    pub const WRITE_MULTIPLE_COILS: u8 = 0x0F;
    pub const WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

    pub const SUPPORTED: [u8; 8] = [
        READ_COILS,
        READ_DISCRETE_INPUTS,
        READ_HOLDING_REGISTERS,
        READ_INPUT_REGISTERS,
        WRITE_SINGLE_COIL,
        WRITE_SINGLE_REGISTER,
        WRITE_MULTIPLE_COILS,
        WRITE_MULTIPLE_REGISTERS,
    ];
}

/// Modbus exception codes, sent in the byte following `function | 0x80`.
pub mod exception {
    pub const ILLEGAL_FUNCTION: u8 = 0x01;
    pub const ILLEGAL_DATA_ADDRESS: u8 = 0x02;
    pub const ILLEGAL_DATA_VALUE: u8 = 0x03;
}

/// Byte offsets inside a request/response frame.
pub(crate) mod pos {
    pub const ID: usize = 0;
    pub const FUNC: usize = 1;
    pub const ADD_HI: usize = 2;
    pub const NB_HI: usize = 4;
    pub const BYTE_CNT: usize = 6;
}

/// Wire quantity ceilings per function code. Read quantities are bounded by
/// the 256-byte response frame, write quantities by the request frame.
pub(crate) mod limits {
    pub const READ_BITS: u16 = 2000;
    pub const WRITE_BITS: u16 = 1968;
    pub const READ_WORDS: u16 = 125;
    pub const WRITE_WORDS: u16 = 123;
}

/// How received bytes reach the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HwMode {
    /// One byte per UART receive interrupt; the T3.5 silence window marks
    /// the end of a frame.
    #[default]
    Interrupt,
    /// DMA into a buffer, cut by the idle-line event. The idle event stands
    /// in for the T3.5 timer.
    #[cfg(feature = "dma")]
    DmaIdle,
}

/// Master transaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ComState {
    Idle,
    Waiting,
}

/// Engine errors. These never appear on the wire; slaves answer protocol
/// violations with an exception frame carrying one of the [`exception`]
/// codes, which a master surfaces as [`Error::Exception`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Frame CRC did not match.
    BadCrc,
    /// Frame shorter than the role minimum, or a data buffer too small for
    /// the requested transfer.
    BadSize,
    /// The receive ring wrapped; the frame was dropped.
    BufferOverflow,
    /// A query was attempted on an instance whose station id is not 0.
    NotMaster,
    /// A query was attempted while a transaction was already in flight.
    Polling,
    /// Target station id outside 1..=247.
    BadSlaveId,
    /// No response within the configured window.
    Timeout,
    /// Telegram flushed from the queue by an inject before transmission.
    Cancelled,
    /// Exception code, either about to be sent by a slave or received by a
    /// master in an exception response.
    Exception(u8),
}

/// Fatal configuration errors, reported at construction instead of at the
/// first transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// A master must use station id 0.
    NotMaster,
    /// A slave station id must be within 1..=247.
    BadStationId,
    /// Slaves require at least the holding-register bank.
    MissingHoldingBank,
    /// The bank mutex was held while the instance was being constructed.
    BanksBusy,
}
