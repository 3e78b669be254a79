/*********************************************************************
 * Modbus RTU hardware interface
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

/// The serial port and RS-485 transceiver of one RTU link.
///
/// Implemented by the board glue on top of the UART driver, e.g. an
/// embassy-stm32 `Uart` plus one or two direction `Output` pins. The
/// direction methods have empty defaults for full-duplex wiring without
/// a transceiver enable pin.
pub trait RtuInterface {
    /// Wait for the next received byte. Must be cancel safe: the engine
    /// drops this future when the T3.5 silence window closes a frame.
    async fn receive_uart_byte(&mut self) -> u8;

    /// Receive into `buf` until the line goes idle, returning the number
    /// of bytes written. The idle event marks the frame boundary, so no
    /// byte of one frame may be held back past it.
    #[cfg(feature = "dma")]
    async fn receive_uart_idle(&mut self, buf: &mut [u8]) -> usize;

    /// Transmit `data`, returning once the peripheral has accepted the
    /// last byte. The shift register may still be draining.
    async fn send_uart_data(&mut self, data: &[u8]);

    /// Wait until the transmit-complete flag is set. The transmit-done
    /// event fires when the shift register is loaded, not drained;
    /// releasing the RS-485 line early truncates the last character.
    /// The byte time is fixed and short, so a bounded spin on the status
    /// bit is expected here rather than a scheduling yield.
    async fn wait_transmission_complete(&mut self) {}

    /// Put the transceiver into transmit direction.
    fn tx_rs485_enable(&mut self) {}

    /// Put the transceiver into receive direction.
    fn rx_rs485_enable(&mut self) {}

    /// Configured baudrate, used to derive the T3.5 silence window.
    fn get_baudrate(&self) -> u32;
}
