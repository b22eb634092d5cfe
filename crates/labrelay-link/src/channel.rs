//! Byte channels under the wired transport.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use crate::error::{LinkError, LinkResult};

/// A full-duplex, non-blocking byte stream such as a UART.
pub trait ByteChannel {
    /// Append every byte available right now to `buf`; returns how many.
    fn read_available(&mut self, buf: &mut Vec<u8>) -> usize;

    /// Queue `data` for transmission.
    fn write_all(&mut self, data: &[u8]) -> LinkResult<()>;
}

/// One end of an in-memory serial line. Create both ends with
/// [`MemoryChannel::pair`].
#[derive(Debug, Clone)]
pub struct MemoryChannel {
    rx: Rc<RefCell<VecDeque<u8>>>,
    tx: Rc<RefCell<VecDeque<u8>>>,
    closed: Rc<Cell<bool>>,
}

impl MemoryChannel {
    /// Two connected ends: bytes written to one are read from the other.
    pub fn pair() -> (MemoryChannel, MemoryChannel) {
        let a_to_b = Rc::new(RefCell::new(VecDeque::new()));
        let b_to_a = Rc::new(RefCell::new(VecDeque::new()));
        let closed = Rc::new(Cell::new(false));
        let a = MemoryChannel {
            rx: b_to_a.clone(),
            tx: a_to_b.clone(),
            closed: closed.clone(),
        };
        let b = MemoryChannel {
            rx: a_to_b,
            tx: b_to_a,
            closed,
        };
        (a, b)
    }

    /// Close the line for both ends.
    pub fn close(&self) {
        self.closed.set(true);
    }

    /// Bytes waiting to be read on this end.
    pub fn pending(&self) -> usize {
        self.rx.borrow().len()
    }
}

impl ByteChannel for MemoryChannel {
    fn read_available(&mut self, buf: &mut Vec<u8>) -> usize {
        let mut rx = self.rx.borrow_mut();
        let n = rx.len();
        buf.extend(rx.drain(..));
        n
    }

    fn write_all(&mut self, data: &[u8]) -> LinkResult<()> {
        if self.closed.get() {
            return Err(LinkError::ChannelClosed);
        }
        self.tx.borrow_mut().extend(data.iter().copied());
        Ok(())
    }
}
