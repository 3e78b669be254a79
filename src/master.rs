/*********************************************************************
 * Modbus RTU master
 *
 * Copyright (C) 2023 Marcel Maage
 *
 * This library is free software; you can redistribute it and/or
 * modify it under the terms of the GNU Lesser General Public
 * License as published by the Free Software Foundation; either
 * version 2.1 of the License, or (at your option) any later version.
 *
 * This library is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * LICENSE file for more details.
 */

use byteorder::{BigEndian, ByteOrder};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Duration};

use crate::interface::RtuInterface;
use crate::transport::{RtuConfig, Transport};
use crate::types::{
    exception, fc, limits, pos, ComState, ConfigError, Error, HwMode, MAX_TELEGRAMS, MIN_RESPONSE,
};
use crate::validate::validate_answer;

/// One request from the host to a remote station.
///
/// `data` supplies the values for writes and receives the values of reads;
/// it travels with the telegram and is handed back through `done`, so the
/// originator regains the buffer together with the outcome.
pub struct Telegram {
    /// Target station, 1..=247.
    pub slave: u8,
    /// Function code, one of [`fc::SUPPORTED`].
    pub function: u8,
    /// Start address of the first coil or register.
    pub address: u16,
    /// Number of coils or registers. Ignored for single writes.
    pub quantity: u16,
    /// Caller-owned transfer buffer. Coils are packed bit `k % 16` of
    /// word `k / 16`.
    pub data: &'static mut [u16],
    /// Signalled exactly once when the transaction completes.
    pub done: &'static CompletionSignal,
}

/// Outcome of a telegram, carrying the transfer buffer back to the
/// originator. `Ok(())` is a completed query.
pub struct Completion {
    pub result: Result<(), Error>,
    pub data: &'static mut [u16],
}

pub type CompletionSignal = Signal<CriticalSectionRawMutex, Completion>;

/// The master telegram queue, allocated by the host:
///
/// ```ignore
/// static QUEUE: TelegramQueue = Channel::new();
/// ```
pub type TelegramQueue = Channel<CriticalSectionRawMutex, Telegram, MAX_TELEGRAMS>;

pub struct MasterConfig {
    pub rtu: RtuConfig,
    /// Must stay 0; masters have no station id of their own.
    pub station: u8,
    pub response_timeout: Duration,
}

impl MasterConfig {
    pub fn station(mut self, station: u8) -> Self {
        self.station = station;
        self
    }

    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
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

impl Default for MasterConfig {
    fn default() -> MasterConfig {
        MasterConfig {
            rtu: RtuConfig::default(),
            station: 0,
            response_timeout: Duration::from_millis(1000),
        }
    }
}

/// Producer side of the telegram queue, held by host tasks.
#[derive(Clone, Copy)]
pub struct MasterHandle {
    queue: &'static TelegramQueue,
}

impl MasterHandle {
    pub fn new(queue: &'static TelegramQueue) -> Self {
        MasterHandle { queue }
    }

    /// Enqueue a telegram at the tail. Blocks while the queue is full.
    ///
    /// Refusals are returned synchronously and additionally complete the
    /// telegram, so the buffer always comes back through the signal.
    pub async fn query(&self, telegram: Telegram) -> Result<(), Error> {
        if let Err(error) = check_telegram(&telegram) {
            complete(telegram, Err(error));
            return Err(error);
        }
        self.queue.send(telegram).await;
        Ok(())
    }

    /// Flush the queue and enqueue an urgent telegram in its place.
    /// Flushed telegrams complete with [`Error::Cancelled`].
    pub fn query_inject(&self, telegram: Telegram) -> Result<(), Error> {
        if let Err(error) = check_telegram(&telegram) {
            complete(telegram, Err(error));
            return Err(error);
        }
        while let Ok(stale) = self.queue.try_receive() {
            complete(stale, Err(Error::Cancelled));
        }
        match self.queue.try_send(telegram) {
            Ok(()) => Ok(()),
            Err(embassy_sync::channel::TrySendError::Full(telegram)) => {
                complete(telegram, Err(Error::Cancelled));
                Err(Error::Cancelled)
            }
        }
    }
}

fn complete(telegram: Telegram, result: Result<(), Error>) {
    let Telegram { data, done, .. } = telegram;
    done.signal(Completion { result, data });
}

/// Words of `data` a transfer needs.
fn data_words(function: u8, quantity: u16) -> u16 {
    match function {
        fc::READ_COILS | fc::READ_DISCRETE_INPUTS | fc::WRITE_MULTIPLE_COILS => {
            quantity / 16 + u16::from(quantity % 16 != 0)
        }
        fc::READ_HOLDING_REGISTERS | fc::READ_INPUT_REGISTERS | fc::WRITE_MULTIPLE_REGISTERS => {
            quantity
        }
        _ => 1,
    }
}

/// Bound a request quantity to what fits in one frame, normalizing the
/// single writes to 1.
fn effective_quantity(function: u8, quantity: u16) -> Result<u16, Error> {
    let ceiling = match function {
        fc::READ_COILS | fc::READ_DISCRETE_INPUTS => limits::READ_BITS,
        fc::WRITE_MULTIPLE_COILS => limits::WRITE_BITS,
        fc::READ_HOLDING_REGISTERS | fc::READ_INPUT_REGISTERS => limits::READ_WORDS,
        fc::WRITE_MULTIPLE_REGISTERS => limits::WRITE_WORDS,
        _ => 1,
    };
    let quantity = match function {
        fc::WRITE_SINGLE_COIL | fc::WRITE_SINGLE_REGISTER => 1,
        _ => quantity,
    };
    if quantity == 0 || quantity > ceiling {
        return Err(Error::Exception(exception::ILLEGAL_DATA_VALUE));
    }
    Ok(quantity)
}

fn check_telegram(telegram: &Telegram) -> Result<(), Error> {
    if !fc::SUPPORTED.contains(&telegram.function) {
        return Err(Error::Exception(exception::ILLEGAL_FUNCTION));
    }
    if telegram.slave == 0 || telegram.slave > 247 {
        return Err(Error::BadSlaveId);
    }
    let quantity = effective_quantity(telegram.function, telegram.quantity)?;
    if telegram.data.len() < usize::from(data_words(telegram.function, quantity)) {
        return Err(Error::BadSize);
    }
    Ok(())
}

/// A Modbus RTU master.
///
/// [`Master::run`] performs one queued transaction per call and is meant
/// to be looped from a dedicated task; host tasks submit telegrams
/// through a [`MasterHandle`] and await their completion signal.
pub struct Master<S> {
    transport: Transport<S>,
    station: u8,
    state: ComState,
    response_timeout: Duration,
    queue: &'static TelegramQueue,
    last_error: Option<Error>,
}

impl<S> Master<S>
where
    S: RtuInterface,
{
    pub fn new(
        hw: S,
        config: MasterConfig,
        queue: &'static TelegramQueue,
    ) -> Result<Self, ConfigError> {
        if config.station != 0 {
            return Err(ConfigError::NotMaster);
        }
        info!("modbus master up");
        Ok(Master {
            transport: Transport::new(hw, config.rtu),
            station: config.station,
            state: ComState::Idle,
            response_timeout: config.response_timeout,
            queue,
            last_error: None,
        })
    }

    pub fn state(&self) -> ComState {
        self.state
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

    /// Dequeue one telegram, transmit it and settle its outcome: a parsed
    /// response, a validation error, or the response timeout.
    pub async fn run(&mut self) {
        let telegram = self.queue.receive().await;
        let Telegram {
            slave,
            function,
            address,
            quantity,
            data,
            done,
        } = telegram;

        self.last_error = None;
        if let Err(error) = self.send_query(slave, function, address, quantity, data).await {
            self.record(error);
            done.signal(Completion {
                result: Err(error),
                data,
            });
            return;
        }

        let outcome = with_timeout(self.response_timeout, self.transport.receive_frame()).await;
        self.state = ComState::Idle;

        let result = match outcome {
            Err(_) => Err(Error::Timeout),
            Ok(Err(error)) => Err(error),
            Ok(Ok(len)) if len < MIN_RESPONSE => Err(Error::BadSize),
            Ok(Ok(len)) => {
                let frame = &self.transport.frame[..len];
                validate_answer(frame).map(|()| match function {
                    fc::READ_COILS | fc::READ_DISCRETE_INPUTS => parse_read_bits(frame, data),
                    fc::READ_HOLDING_REGISTERS | fc::READ_INPUT_REGISTERS => {
                        parse_read_words(frame, data)
                    }
                    // writes carry no payload back
                    _ => {}
                })
            }
        };

        if let Err(error) = result {
            warn!("transaction failed");
            self.record(error);
        }
        done.signal(Completion { result, data });
    }

    /// Build and transmit the request frame for one telegram. The caller
    /// state must be idle; on success the response timeout window starts.
    async fn send_query(
        &mut self,
        slave: u8,
        function: u8,
        address: u16,
        quantity: u16,
        data: &[u16],
    ) -> Result<(), Error> {
        if self.station != 0 {
            return Err(Error::NotMaster);
        }
        if self.state != ComState::Idle {
            return Err(Error::Polling);
        }
        if slave == 0 || slave > 247 {
            return Err(Error::BadSlaveId);
        }
        let quantity = effective_quantity(function, quantity)?;

        self.transport.discard_pending();
        let frame = &mut self.transport.frame;
        frame[pos::ID] = slave;
        frame[pos::FUNC] = function;
        BigEndian::write_u16(&mut frame[pos::ADD_HI..pos::ADD_HI + 2], address);

        let len = match function {
            fc::READ_COILS
            | fc::READ_DISCRETE_INPUTS
            | fc::READ_HOLDING_REGISTERS
            | fc::READ_INPUT_REGISTERS => {
                BigEndian::write_u16(&mut frame[pos::NB_HI..pos::NB_HI + 2], quantity);
                6
            }
            fc::WRITE_SINGLE_COIL => {
                frame[pos::NB_HI] = if data.first().copied().unwrap_or(0) > 0 {
                    0xFF
                } else {
                    0x00
                };
                frame[pos::NB_HI + 1] = 0x00;
                6
            }
            fc::WRITE_SINGLE_REGISTER => {
                BigEndian::write_u16(
                    &mut frame[pos::NB_HI..pos::NB_HI + 2],
                    data.first().copied().unwrap_or(0),
                );
                6
            }
            fc::WRITE_MULTIPLE_COILS => {
                BigEndian::write_u16(&mut frame[pos::NB_HI..pos::NB_HI + 2], quantity);
                let byte_count = (usize::from(quantity) + 7) / 8;
                frame[pos::BYTE_CNT] = byte_count as u8;
                for byte in &mut frame[7..7 + byte_count] {
                    *byte = 0;
                }
                for i in 0..usize::from(quantity) {
                    let on = data
                        .get(i / 16)
                        .map_or(false, |word| (word >> (i % 16)) & 1 != 0);
                    if on {
                        frame[7 + i / 8] |= 1 << (i % 8);
                    }
                }
                7 + byte_count
            }
            fc::WRITE_MULTIPLE_REGISTERS => {
                BigEndian::write_u16(&mut frame[pos::NB_HI..pos::NB_HI + 2], quantity);
                frame[pos::BYTE_CNT] = (quantity * 2) as u8;
                let mut len = 7;
                for i in 0..usize::from(quantity) {
                    BigEndian::write_u16(
                        &mut frame[len..len + 2],
                        data.get(i).copied().unwrap_or(0),
                    );
                    len += 2;
                }
                len
            }
            _ => return Err(Error::Exception(exception::ILLEGAL_FUNCTION)),
        };

        self.transport.frame_len = len;
        self.transport.send_frame().await;
        self.state = ComState::Waiting;
        Ok(())
    }
}

/// FC 1 / FC 2 response: move the packed payload bytes into the caller
/// buffer, low byte of each word first.
fn parse_read_bits(frame: &[u8], data: &mut [u16]) {
    let count = usize::from(frame[2])
        .min(frame.len().saturating_sub(5))
        .min(data.len() * 2);
    for i in 0..count {
        let byte = u16::from(frame[3 + i]);
        let word = &mut data[i / 2];
        *word = if i % 2 == 0 {
            (*word & 0xFF00) | byte
        } else {
            (*word & 0x00FF) | (byte << 8)
        };
    }
}

/// FC 3 / FC 4 response: big-endian words into the caller buffer.
fn parse_read_words(frame: &[u8], data: &mut [u16]) {
    let count = (usize::from(frame[2]) / 2)
        .min(frame.len().saturating_sub(5) / 2)
        .min(data.len());
    for (i, word) in data.iter_mut().enumerate().take(count) {
        *word = BigEndian::read_u16(&frame[3 + i * 2..]);
    }
}
