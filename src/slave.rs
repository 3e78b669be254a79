use byteorder::{BigEndian, ByteOrder};

use crate::banks::{coil_read, coil_write, SharedBanks};
use crate::frame::build_exception;
use crate::interface::RtuInterface;
use crate::transport::{RtuConfig, Transport};
use crate::types::{
    exception, fc, pos, ConfigError, Error, HwMode, ECHO_LEN, MAX_BUFFER, MIN_REQUEST,
};
use crate::validate::validate_request;
use embassy_time::Duration;

pub struct SlaveConfig {
    pub rtu: RtuConfig,
    /// Station id of this slave, 1..=247.
    pub station: u8,
}

impl SlaveConfig {
    pub fn station(mut self, station: u8) -> Self {
        self.station = station;
        self
    }

    pub fn hw_mode(mut self, hw_mode: HwMode) -> Self {
        self.rtu.hw_mode = hw_mode;
        self
    }

    pub fn t35(mut self, t35: Duration) -> Self {
        self.rtu.t35 = Some(t35);
        self
    }
}

impl Default for SlaveConfig {
    fn default() -> SlaveConfig {
        SlaveConfig {
            rtu: RtuConfig::default(),
            station: 1,
        }
    }
}

/// A Modbus RTU slave station.
///
/// The host owns the register banks and shares them through the bank
/// mutex; [`Slave::run`] serves one request per call and is meant to be
/// looped from a dedicated task:
///
/// ```ignore
/// #[embassy_executor::task]
/// async fn modbus_task(mut slave: Slave<'static, Port>) {
///     loop {
///         slave.run().await;
///     }
/// }
/// ```
pub struct Slave<'a, S> {
    transport: Transport<S>,
    station: u8,
    banks: &'a SharedBanks<'a>,
    last_error: Option<Error>,
}

impl<'a, S> Slave<'a, S>
where
    S: RtuInterface,
{
    pub fn new(
        hw: S,
        config: SlaveConfig,
        banks: &'a SharedBanks<'a>,
    ) -> Result<Self, ConfigError> {
        if config.station == 0 || config.station > 247 {
            return Err(ConfigError::BadStationId);
        }
        {
            let guard = banks.try_lock().map_err(|_| ConfigError::BanksBusy)?;
            if guard.holding.is_none() {
                return Err(ConfigError::MissingHoldingBank);
            }
        }
        info!("modbus slave {} up", config.station);
        Ok(Slave {
            transport: Transport::new(hw, config.rtu),
            station: config.station,
            banks,
            last_error: None,
        })
    }

    pub fn station(&self) -> u8 {
        self.station
    }

    pub fn last_error(&self) -> Option<Error> {
        self.last_error
    }

    pub fn in_count(&self) -> u16 {
        self.transport.in_count
    }

    pub fn out_count(&self) -> u16 {
        self.transport.out_count
    }

    pub fn err_count(&self) -> u16 {
        self.transport.err_count
    }

    fn record(&mut self, error: Error) {
        self.transport.err_count = self.transport.err_count.wrapping_add(1);
        self.last_error = Some(error);
    }

    /// Receive and serve one request.
    pub async fn run(&mut self) {
        self.last_error = None;

        let len = match self.transport.receive_frame().await {
            Ok(len) => len,
            Err(error) => {
                warn!("rx dropped: buffer overflow");
                self.record(error);
                return;
            }
        };

        if len < MIN_REQUEST {
            self.record(Error::BadSize);
            return;
        }

        // not addressed to us, not an error
        if self.transport.frame[pos::ID] != self.station {
            self.transport.frame_len = 0;
            return;
        }

        let mut banks = self.banks.lock().await;
        if let Err(error) = validate_request(&self.transport.frame[..len], &banks) {
            drop(banks);
            self.record(error);
            if let Error::Exception(code) = error {
                debug!("request rejected, exception {}", code);
                self.transport.frame_len = build_exception(&mut self.transport.frame, code);
                self.transport.send_frame().await;
            }
            return;
        }

        let frame = &mut self.transport.frame;
        let response_len = match frame[pos::FUNC] {
            fc::READ_COILS => banks.coils.as_deref().map(|regs| read_bits(frame, regs)),
            fc::READ_DISCRETE_INPUTS => banks.discrete.as_deref().map(|regs| read_bits(frame, regs)),
            fc::READ_HOLDING_REGISTERS => banks.holding.as_deref().map(|regs| read_words(frame, regs)),
            fc::READ_INPUT_REGISTERS => banks.input.as_deref().map(|regs| read_words(frame, regs)),
            fc::WRITE_SINGLE_COIL => banks.coils.as_deref_mut().map(|regs| write_bit(frame, regs)),
            fc::WRITE_SINGLE_REGISTER => {
                banks.holding.as_deref_mut().map(|regs| write_word(frame, regs))
            }
            fc::WRITE_MULTIPLE_COILS => {
                banks.coils.as_deref_mut().map(|regs| write_bits(frame, regs))
            }
            fc::WRITE_MULTIPLE_REGISTERS => {
                banks.holding.as_deref_mut().map(|regs| write_words(frame, regs))
            }
            _ => None,
        };
        drop(banks);

        match response_len {
            Some(len) => {
                self.transport.frame_len = len;
                self.transport.send_frame().await;
            }
            // not reachable while the guard is held across validation
            None => {
                self.record(Error::Exception(exception::ILLEGAL_DATA_ADDRESS));
                self.transport.frame_len =
                    build_exception(&mut self.transport.frame, exception::ILLEGAL_DATA_ADDRESS);
                self.transport.send_frame().await;
            }
        }
    }
}

/// FC 1 / FC 2: pack the addressed bits into the response, LSB first.
fn read_bits(frame: &mut [u8; MAX_BUFFER], regs: &[u16]) -> usize {
    let start = BigEndian::read_u16(&frame[pos::ADD_HI..]) as usize;
    let quantity = BigEndian::read_u16(&frame[pos::NB_HI..]) as usize;

    let byte_count = (quantity + 7) / 8;
    frame[2] = byte_count as u8;
    for byte in &mut frame[3..3 + byte_count] {
        *byte = 0;
    }
    for i in 0..quantity {
        if coil_read(regs, start + i) {
            frame[3 + i / 8] |= 1 << (i % 8);
        }
    }
    3 + byte_count
}

/// FC 3 / FC 4: copy the addressed words into the response, big-endian.
fn read_words(frame: &mut [u8; MAX_BUFFER], regs: &[u16]) -> usize {
    let start = BigEndian::read_u16(&frame[pos::ADD_HI..]) as usize;
    let quantity = BigEndian::read_u16(&frame[pos::NB_HI..]) as usize;

    frame[2] = (quantity * 2) as u8;
    let mut len = 3;
    for value in &regs[start..start + quantity] {
        BigEndian::write_u16(&mut frame[len..len + 2], *value);
        len += 2;
    }
    len
}

/// FC 5: 0xFF00 sets the coil, anything else clears it. The response
/// echoes the request.
fn write_bit(frame: &mut [u8; MAX_BUFFER], regs: &mut [u16]) -> usize {
    let coil = BigEndian::read_u16(&frame[pos::ADD_HI..]) as usize;
    coil_write(regs, coil, frame[pos::NB_HI] == 0xFF);
    ECHO_LEN
}

/// FC 6: write one word. The response echoes the request.
fn write_word(frame: &mut [u8; MAX_BUFFER], regs: &mut [u16]) -> usize {
    let address = BigEndian::read_u16(&frame[pos::ADD_HI..]) as usize;
    regs[address] = BigEndian::read_u16(&frame[pos::NB_HI..]);
    ECHO_LEN
}

/// FC 15: unpack the request bits into the coil bank. The response echoes
/// start and quantity.
fn write_bits(frame: &mut [u8; MAX_BUFFER], regs: &mut [u16]) -> usize {
    let start = BigEndian::read_u16(&frame[pos::ADD_HI..]) as usize;
    let quantity = BigEndian::read_u16(&frame[pos::NB_HI..]) as usize;

    for i in 0..quantity {
        let on = (frame[7 + i / 8] >> (i % 8)) & 1 != 0;
        coil_write(regs, start + i, on);
    }
    ECHO_LEN
}

/// FC 16: write the request words into the holding bank. The response
/// echoes start and quantity.
fn write_words(frame: &mut [u8; MAX_BUFFER], regs: &mut [u16]) -> usize {
    let start = BigEndian::read_u16(&frame[pos::ADD_HI..]) as usize;
    let quantity = BigEndian::read_u16(&frame[pos::NB_HI..]) as usize;

    for i in 0..quantity {
        regs[start + i] = BigEndian::read_u16(&frame[pos::BYTE_CNT + 1 + i * 2..]);
    }
    ECHO_LEN
}
