//! Scripted in-memory port for tests.
//!
//! Records every write (with the instant it happened, so protocol timing can
//! be asserted), serves queued read data, and can be told to start failing
//! writes at a given point to exercise the error paths.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::port::Port;

/// Shared, inspectable state behind a [`MockPort`].
pub(crate) struct MockState {
    /// Every completed write, in order, with its timestamp.
    pub writes: Vec<(Vec<u8>, Instant)>,
    /// Data served to `read`, one queued chunk per call.
    pub reads: VecDeque<Vec<u8>>,
    /// Writes at index >= this value fail with `TimedOut`.
    pub fail_writes_from: Option<usize>,
    /// Whether `close` was called.
    pub closed: bool,
}

impl MockState {
    fn new() -> Self {
        Self {
            writes: Vec::new(),
            reads: VecDeque::new(),
            fail_writes_from: None,
            closed: false,
        }
    }

    /// The recorded write payloads, without timestamps.
    pub fn write_payloads(&self) -> Vec<Vec<u8>> {
        self.writes.iter().map(|(data, _)| data.clone()).collect()
    }
}

/// In-memory [`Port`] implementation.
pub(crate) struct MockPort {
    state: Arc<Mutex<MockState>>,
    name: String,
    timeout: Duration,
}

impl MockPort {
    /// Create a port plus a handle for inspecting it after ownership of the
    /// port has moved into the code under test.
    pub fn new(name: &str) -> (Self, Arc<Mutex<MockState>>) {
        let state = Arc::new(Mutex::new(MockState::new()));
        (
            Self {
                state: Arc::clone(&state),
                name: name.to_string(),
                timeout: Duration::from_millis(1000),
            },
            state,
        )
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock port state poisoned")
    }
}

impl Port for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.state().reads.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> Result<()> {
        self.state().closed = true;
        Ok(())
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.state().reads.pop_front() {
            Some(chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                Ok(n)
            },
            // Nothing queued reads like an elapsed serial timeout.
            None => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "no scripted data",
            )),
        }
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut state = self.state();
        if let Some(from) = state.fail_writes_from {
            if state.writes.len() >= from {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "scripted write timeout",
                ));
            }
        }
        state.writes.push((buf.to_vec(), Instant::now()));
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_records_writes_in_order() {
        let (mut port, state) = MockPort::new("mock0");
        port.write_all_bytes(b"ab").unwrap();
        port.write_all_bytes(b"c").unwrap();
        let payloads = state.lock().unwrap().write_payloads();
        assert_eq!(payloads, vec![b"ab".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn test_mock_scripted_write_failure() {
        let (mut port, state) = MockPort::new("mock0");
        state.lock().unwrap().fail_writes_from = Some(1);
        port.write_all_bytes(b"ok").unwrap();
        let err = port.write_all_bytes(b"boom").unwrap_err();
        assert!(err.to_string().contains("Timeout") || err.to_string().contains("timeout"));
        assert_eq!(state.lock().unwrap().writes.len(), 1);
    }

    #[test]
    fn test_mock_read_serves_queued_chunks_then_times_out() {
        let (mut port, state) = MockPort::new("mock0");
        state.lock().unwrap().reads.push_back(b"hi".to_vec());
        let mut buf = [0u8; 8];
        assert_eq!(port.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"hi");
        let err = port.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::TimedOut);
    }
}
