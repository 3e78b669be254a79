//! Modbus RTU master/slave engine for half-duplex serial links.
//!
//! The engine is hardware-agnostic: the board glue implements
//! [`RtuInterface`] on top of its UART driver and RS-485 direction pins,
//! picks a role and spawns its `run` loop on the executor. Register banks
//! stay owned by the host application and are shared with a slave through
//! the bank mutex; master transactions are submitted as [`Telegram`]s
//! through a [`MasterHandle`] and complete through a per-originator
//! [`CompletionSignal`].

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![allow(async_fn_in_trait)]

#[macro_use]
mod fmt;

mod banks;
mod frame;
mod interface;
mod master;
mod ring;
mod slave;
#[cfg(test)]
mod testutil;
mod transport;
mod types;
mod validate;

pub use banks::{coil_read, coil_write, BankSet, SharedBanks};
pub use frame::{crc16, t35_interval};
pub use interface::RtuInterface;
pub use master::{
    Completion, CompletionSignal, Master, MasterConfig, MasterHandle, Telegram, TelegramQueue,
};
pub use ring::RingBuffer;
pub use slave::{Slave, SlaveConfig};
pub use transport::RtuConfig;
pub use types::{
    exception, fc, ComState, ConfigError, Error, HwMode, MAX_BUFFER, MAX_TELEGRAMS,
};
