//! Byte channels for whatever is plugged into the RS423 port.
//!
//! The serial controller polls an input for available bytes once per tick
//! and never waits on it. Output writes may block; the host side is assumed
//! to drain faster than a 1980s serial line can fill it.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::rc::Rc;
use std::sync::mpsc::{channel, Receiver, TryRecvError};
use std::thread;

/// Non-blocking byte source.
pub trait ByteInput {
    /// Bytes that can be read right now without blocking.
    fn readable_bytes(&mut self) -> usize;

    /// Read one byte. Only called after `readable_bytes` reported at least one.
    fn read_byte(&mut self) -> io::Result<u8>;
}

/// Byte sink; a write may block until the peer accepts it.
pub trait ByteOutput {
    fn write_byte(&mut self, byte: u8) -> io::Result<()>;
}

impl<T: ByteInput + ?Sized> ByteInput for Rc<RefCell<T>> {
    fn readable_bytes(&mut self) -> usize {
        self.borrow_mut().readable_bytes()
    }

    fn read_byte(&mut self) -> io::Result<u8> {
        self.borrow_mut().read_byte()
    }
}

impl<T: ByteOutput + ?Sized> ByteOutput for Rc<RefCell<T>> {
    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        self.borrow_mut().write_byte(byte)
    }
}

/// Shared in-memory FIFO.
///
/// Clones share the same buffer, so one clone can be plugged into the
/// serial port while another feeds or inspects it.
#[derive(Debug, Clone, Default)]
pub struct ByteQueue {
    bytes: Rc<RefCell<VecDeque<u8>>>,
}

impl ByteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let queue = Self::new();
        queue.push_bytes(bytes);
        queue
    }

    pub fn push_bytes(&self, bytes: &[u8]) {
        self.bytes.borrow_mut().extend(bytes.iter().copied());
    }

    /// Remove and return everything queued.
    pub fn drain(&self) -> Vec<u8> {
        self.bytes.borrow_mut().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.bytes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.borrow().is_empty()
    }
}

impl ByteInput for ByteQueue {
    fn readable_bytes(&mut self) -> usize {
        self.len()
    }

    fn read_byte(&mut self) -> io::Result<u8> {
        self.bytes
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| io::Error::from(io::ErrorKind::WouldBlock))
    }
}

impl ByteOutput for ByteQueue {
    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        self.bytes.borrow_mut().push_back(byte);
        Ok(())
    }
}

/// Input fed by a background thread reading any blocking reader (stdin, a pipe).
pub struct ChannelInput {
    receiver: Receiver<u8>,
    pending: VecDeque<u8>,
    closed: bool,
}

impl ChannelInput {
    pub fn spawn_reader<R>(mut reader: R) -> io::Result<Self>
    where
        R: Read + Send + 'static,
    {
        let (sender, receiver) = channel::<u8>();
        thread::Builder::new()
            .name("rs423-reader".to_string())
            .spawn(move || {
                let mut buf = [0u8; 256];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            if buf[..n].iter().any(|&b| sender.send(b).is_err()) {
                                break;
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(_) => break,
                    }
                }
            })?;
        Ok(Self {
            receiver,
            pending: VecDeque::new(),
            closed: false,
        })
    }

    /// True once the reader hit end of input and everything was consumed.
    pub fn is_exhausted(&mut self) -> bool {
        self.pull();
        self.closed && self.pending.is_empty()
    }

    fn pull(&mut self) {
        loop {
            match self.receiver.try_recv() {
                Ok(byte) => self.pending.push_back(byte),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.closed = true;
                    break;
                }
            }
        }
    }
}

impl ByteInput for ChannelInput {
    fn readable_bytes(&mut self) -> usize {
        self.pull();
        self.pending.len()
    }

    fn read_byte(&mut self) -> io::Result<u8> {
        self.pull();
        self.pending
            .pop_front()
            .ok_or_else(|| io::Error::from(io::ErrorKind::WouldBlock))
    }
}

/// Output to any writer, flushed after every byte.
pub struct WriterOutput<W: Write> {
    inner: W,
}

impl<W: Write> WriterOutput<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> ByteOutput for WriterOutput<W> {
    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        self.inner.write_all(&[byte])?;
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_queue_clones_share_bytes() {
        let feed = ByteQueue::from_bytes(b"hi");
        let mut port_side = feed.clone();

        assert_eq!(port_side.readable_bytes(), 2);
        assert_eq!(port_side.read_byte().unwrap(), b'h');
        assert_eq!(feed.len(), 1);

        feed.push_bytes(b"!");
        assert_eq!(port_side.readable_bytes(), 2);
        assert_eq!(feed.drain(), b"i!".to_vec());
        assert!(port_side.read_byte().is_err());
    }

    #[test]
    fn test_queue_as_output() {
        let sink = ByteQueue::new();
        let mut port_side = sink.clone();
        port_side.write_byte(b'\r').unwrap();
        port_side.write_byte(b'A').unwrap();
        assert_eq!(sink.drain(), vec![b'\r', b'A']);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_shared_handle_stays_inspectable() {
        let out = Rc::new(RefCell::new(WriterOutput::new(Vec::new())));
        let mut port_side = out.clone();
        port_side.write_byte(b'x').unwrap();
        assert_eq!(out.borrow().inner, b"x".to_vec());
    }

    #[test]
    fn test_writer_output() {
        let mut out = WriterOutput::new(Vec::new());
        out.write_byte(b'O').unwrap();
        out.write_byte(b'K').unwrap();
        assert_eq!(out.into_inner(), b"OK".to_vec());
    }

    #[test]
    fn test_channel_input_reads_everything() {
        let mut input = ChannelInput::spawn_reader(io::Cursor::new(b"abc".to_vec())).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut got = Vec::new();
        while got.len() < 3 && Instant::now() < deadline {
            if input.readable_bytes() > 0 {
                got.push(input.read_byte().unwrap());
            } else {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        assert_eq!(got, b"abc".to_vec());

        while !input.is_exhausted() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(input.is_exhausted());
        assert!(input.read_byte().is_err());
    }
}
