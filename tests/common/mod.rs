//! In-memory stand-in for the monitor firmware.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hrv_link::{RetryPolicy, SerialChannel, Session, SessionConfig};

#[derive(Default)]
struct DeviceState {
    /// Bytes the device has emitted but the host has not read yet.
    outbox: VecDeque<u8>,
    /// Every command written by the host, one entry per write.
    commands: Vec<String>,
    /// Canned answer per command.
    responses: HashMap<String, String>,
    eof: bool,
}

/// Reactive fake device: answers a command only once it has been written,
/// and serves its output in small chunks.
#[derive(Clone)]
pub struct MockDevice {
    state: Arc<Mutex<DeviceState>>,
    max_chunk: usize,
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(DeviceState::default())),
            max_chunk: 7,
        }
    }

    /// Output the device produces without being asked (button presses,
    /// live telemetry).
    pub fn emit(&self, text: &str) -> &Self {
        self.state.lock().unwrap().outbox.extend(text.bytes());
        self
    }

    pub fn respond(&self, command: &str, answer: &str) -> &Self {
        self.state
            .lock()
            .unwrap()
            .responses
            .insert(command.to_string(), answer.to_string());
        self
    }

    /// Report end-of-stream once the outbox is empty.
    pub fn hang_up(&self) {
        self.state.lock().unwrap().eof = true;
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn channel(&self) -> SerialChannel {
        SerialChannel::from_transport(Box::new(self.clone()))
    }
}

impl Read for MockDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        if state.outbox.is_empty() {
            if state.eof {
                return Ok(0);
            }
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.max_chunk).min(state.outbox.len());
        for (slot, byte) in buf.iter_mut().zip(state.outbox.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        let command = String::from_utf8_lossy(buf).into_owned();
        if let Some(answer) = state.responses.get(&command).cloned() {
            state.outbox.extend(answer.bytes());
        }
        state.commands.push(command);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Short timeouts so failure paths finish quickly.
pub fn fast_config() -> SessionConfig {
    SessionConfig {
        line_timeout: Duration::from_millis(20),
        response_timeout: Duration::from_millis(20),
        settle_delay: Duration::ZERO,
        simulation_duration: Duration::ZERO,
        phase_idle_timeout: Some(Duration::from_millis(200)),
        command_retry: RetryPolicy::new(3, Duration::from_millis(1)),
        sentinel_retry: RetryPolicy::new(3, Duration::from_millis(1)),
        button_timeout: Some(Duration::from_millis(100)),
        ..SessionConfig::default()
    }
}

/// A device that answers all five follow-up requests.
pub fn scripted_device() -> MockDevice {
    let device = MockDevice::new();
    device
        .respond("s1", "0\r\n1\r\n3\r\n0\r\n2\r\nDone hist\r\n")
        .respond("s2", "0\r\n0\r\n5\r\nDone hist\r\n")
        .respond("s3", "42.0\r\n")
        .respond("s4", "10.5\r\n")
        .respond("s5", "33.3\r\n");
    device
}

pub fn session(device: &MockDevice) -> Session<SerialChannel> {
    Session::new(device.channel(), fast_config())
}
