/*********************************************************************
 * Modbus RTU transport
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
use embassy_time::{with_timeout, Duration};

use crate::frame::{crc16, t35_interval};
use crate::interface::RtuInterface;
use crate::ring::RingBuffer;
use crate::types::{Error, HwMode, MAX_BUFFER};

/// Failsafe around the UART transmit, in case the driver notification
/// never comes.
const TX_FAILSAFE: Duration = Duration::from_millis(250);

/// Link-level configuration shared by both roles.
pub struct RtuConfig {
    pub hw_mode: HwMode,
    /// Override for the inter-frame silence window. When `None` it is
    /// derived from the interface baudrate.
    pub t35: Option<Duration>,
}

impl RtuConfig {
    pub fn hw_mode(mut self, hw_mode: HwMode) -> Self {
        self.hw_mode = hw_mode;
        self
    }

    pub fn t35(mut self, t35: Duration) -> Self {
        self.t35 = Some(t35);
        self
    }
}

impl Default for RtuConfig {
    fn default() -> RtuConfig {
        RtuConfig {
            hw_mode: HwMode::default(),
            t35: None,
        }
    }
}

/// Frame assembler and send path of one RTU link: owns the serial
/// interface, the receive ring, the scratch frame and the port counters.
pub(crate) struct Transport<S> {
    hw: S,
    mode: HwMode,
    t35: Duration,
    ring: RingBuffer,
    pub(crate) frame: [u8; MAX_BUFFER],
    pub(crate) frame_len: usize,
    pub(crate) in_count: u16,
    pub(crate) out_count: u16,
    pub(crate) err_count: u16,
}

impl<S> Transport<S>
where
    S: RtuInterface,
{
    pub(crate) fn new(hw: S, config: RtuConfig) -> Self {
        let t35 = config.t35.unwrap_or_else(|| t35_interval(hw.get_baudrate()));
        Transport {
            hw,
            mode: config.hw_mode,
            t35,
            ring: RingBuffer::new(),
            frame: [0; MAX_BUFFER],
            frame_len: 0,
            in_count: 0,
            out_count: 0,
            err_count: 0,
        }
    }

    /// Receive one frame into the scratch buffer and return its length.
    ///
    /// In interrupt mode the first byte is awaited without a deadline and
    /// every further byte restarts the T3.5 window; its expiry is the end
    /// of the frame. In DMA mode one idle-line transfer is the frame.
    pub(crate) async fn receive_frame(&mut self) -> Result<usize, Error> {
        match self.mode {
            HwMode::Interrupt => {
                let byte = self.hw.receive_uart_byte().await;
                self.ring.push(byte);
                while let Ok(byte) = with_timeout(self.t35, self.hw.receive_uart_byte()).await {
                    self.ring.push(byte);
                }
            }
            #[cfg(feature = "dma")]
            HwMode::DmaIdle => {
                let mut chunk = [0u8; MAX_BUFFER];
                let received = self.hw.receive_uart_idle(&mut chunk).await;
                for byte in &chunk[..received] {
                    self.ring.push(*byte);
                }
            }
        }

        if self.ring.overflow() {
            self.ring.clear();
            return Err(Error::BufferOverflow);
        }
        self.frame_len = self.ring.drain(&mut self.frame);
        self.in_count = self.in_count.wrapping_add(1);
        trace!("rx frame, {} bytes", self.frame_len);
        Ok(self.frame_len)
    }

    /// Append the CRC to the scratch frame and transmit it, holding the
    /// transceiver in transmit direction until the shift register has
    /// drained.
    pub(crate) async fn send_frame(&mut self) {
        let crc = crc16(&self.frame[..self.frame_len]);
        BigEndian::write_u16(&mut self.frame[self.frame_len..self.frame_len + 2], crc);
        self.frame_len += 2;

        self.hw.tx_rs485_enable();
        let sent = with_timeout(TX_FAILSAFE, self.hw.send_uart_data(&self.frame[..self.frame_len])).await;
        if sent.is_ok() {
            self.hw.wait_transmission_complete().await;
        } else {
            warn!("tx did not complete within the failsafe window");
        }
        self.hw.rx_rs485_enable();

        self.frame_len = 0;
        self.out_count = self.out_count.wrapping_add(1);
    }

    /// Drop anything received so far. A late response that straggles in
    /// after a timeout must not leak into the next transaction.
    pub(crate) fn discard_pending(&mut self) {
        self.ring.clear();
        self.frame_len = 0;
    }
}
