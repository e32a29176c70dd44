//! Byte devices behind `IN` and `OUT`.
//!
//! - [`StdIO`]: the host process's stdin and stdout.
//! - [`BufferedIO`]: shared in-memory queues, readable from outside the machine.
//! - [`EmptyIO`]: no input, output is discarded.

use std::collections::VecDeque;
use std::fmt::Debug;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};

/// A device exchanging single bytes with the machine.
pub trait Device: Debug {
    /// Blocks until a byte is available, `None` at end of input.
    fn input(&mut self) -> io::Result<Option<u8>>;

    fn output(&mut self, byte: u8) -> io::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyIO;

impl Device for EmptyIO {
    fn input(&mut self) -> io::Result<Option<u8>> {
        Ok(None)
    }

    fn output(&mut self, _byte: u8) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StdIO;

impl Device for StdIO {
    fn input(&mut self) -> io::Result<Option<u8>> {
        let mut byte = [0];

        match io::stdin().lock().read(&mut byte)? {
            0 => Ok(None),
            _ => Ok(Some(byte[0])),
        }
    }

    fn output(&mut self, byte: u8) -> io::Result<()> {
        let mut stdout = io::stdout().lock();

        stdout.write_all(&[byte])?;
        stdout.flush()
    }
}

/// Clones share the same buffers, so a host can keep one handle and give
/// the other to the machine.
#[derive(Debug, Default, Clone)]
pub struct BufferedIO {
    input: Arc<Mutex<VecDeque<u8>>>,
    output: Arc<Mutex<Vec<u8>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl BufferedIO {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(input: impl AsRef<[u8]>) -> Self {
        let io = Self::new();

        io.push_input(input);

        io
    }

    pub fn push_input(&self, input: impl AsRef<[u8]>) {
        lock(&self.input).extend(input.as_ref());
    }

    pub fn written(&self) -> Vec<u8> {
        lock(&self.output).clone()
    }

    pub fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut *lock(&self.output))
    }
}

impl Device for BufferedIO {
    fn input(&mut self) -> io::Result<Option<u8>> {
        Ok(lock(&self.input).pop_front())
    }

    fn output(&mut self, byte: u8) -> io::Result<()> {
        lock(&self.output).push(byte);

        Ok(())
    }
}
