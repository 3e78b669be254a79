use core::cell::RefCell;
use core::future::poll_fn;
use core::task::Poll;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::interface::RtuInterface;

pub(crate) type Wire = Rc<RefCell<VecDeque<u8>>>;

pub(crate) fn wire() -> Wire {
    Rc::new(RefCell::new(VecDeque::new()))
}

/// A serial port over two in-memory wires. Reads block (pending) while the
/// rx wire is empty, which lets the T3.5 window close frames exactly as on
/// a real link.
pub(crate) struct MockSerial {
    pub rx: Wire,
    pub tx: Wire,
    pub baudrate: u32,
}

impl MockSerial {
    pub fn new(rx: Wire, tx: Wire) -> Self {
        MockSerial {
            rx,
            tx,
            baudrate: 115_200,
        }
    }
}

impl RtuInterface for MockSerial {
    async fn receive_uart_byte(&mut self) -> u8 {
        poll_fn(|cx| {
            cx.waker().wake_by_ref();
            match self.rx.borrow_mut().pop_front() {
                Some(byte) => Poll::Ready(byte),
                None => Poll::Pending,
            }
        })
        .await
    }

    #[cfg(feature = "dma")]
    async fn receive_uart_idle(&mut self, buf: &mut [u8]) -> usize {
        poll_fn(|cx| {
            cx.waker().wake_by_ref();
            let mut rx = self.rx.borrow_mut();
            if rx.is_empty() {
                return Poll::Pending;
            }
            let mut count = 0;
            while count < buf.len() {
                match rx.pop_front() {
                    Some(byte) => {
                        buf[count] = byte;
                        count += 1;
                    }
                    None => break,
                }
            }
            Poll::Ready(count)
        })
        .await
    }

    async fn send_uart_data(&mut self, data: &[u8]) {
        self.tx.borrow_mut().extend(data.iter().copied());
    }

    fn get_baudrate(&self) -> u32 {
        self.baudrate
    }
}

/// Build a full wire frame from a body by appending its CRC.
pub(crate) fn with_crc(body: &[u8]) -> Vec<u8> {
    let crc = crate::frame::crc16(body);
    let mut frame = body.to_vec();
    frame.push((crc >> 8) as u8);
    frame.push(crc as u8);
    frame
}
