#![allow(dead_code)]

use neovolt_bridge::modbus::{Connector, Transport};
use neovolt_bridge::prelude::*;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn common_setup() {
    neovolt_bridge::init_logging("debug");
}

pub struct Factory();
impl Factory {
    /// Host device with pacing and retries turned off so tests run instantly.
    pub fn device() -> Device {
        Device {
            enabled: true,
            name: "battery".to_owned(),
            host: "127.0.0.1".to_owned(),
            port: 502,
            unit_id: 85,
            role: Role::Host,
            max_charge_power_kw: Some(5.0),
            max_discharge_power_kw: Some(5.0),
            min_poll_interval: Some(Duration::from_secs(10)),
            max_poll_interval: Some(Duration::from_secs(300)),
            failure_threshold: Some(5),
            read_timeout: Some(Duration::from_secs(1)),
            command_interval: Some(Duration::ZERO),
            write_settle: Some(Duration::ZERO),
            read_retries: Some(0),
            reconnect_backoff_initial: Some(Duration::ZERO),
            reconnect_backoff_max: Some(Duration::ZERO),
            ..Default::default()
        }
    }

    pub fn follower() -> Device {
        Device {
            name: "follower".to_owned(),
            role: Role::Follower,
            max_charge_power_kw: None,
            max_discharge_power_kw: None,
            ..Self::device()
        }
    }

    pub fn inverter(device: &Device) -> (Inverter, MockDevice) {
        let mock = MockDevice::default();
        (Inverter::with_connector(device, Box::new(mock.connector())), mock)
    }
}

#[derive(Default)]
struct MockState {
    registers: HashMap<u16, u16>,
    writes: Vec<(u16, Vec<u16>)>,
    reads: u64,
    connects: u64,
    failing_reads: u32,
    fail_writes: bool,
    refuse_connects: bool,
}

/// In-memory register space standing in for a device on the wire.
#[derive(Clone, Default)]
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
}

impl MockDevice {
    pub fn connector(&self) -> MockConnector {
        MockConnector {
            state: self.state.clone(),
        }
    }

    pub fn set_words(&self, address: u16, words: &[u16]) {
        let mut state = self.state.lock().unwrap();
        for (i, word) in words.iter().enumerate() {
            state.registers.insert(address + i as u16, *word);
        }
    }

    /// Makes the next `count` reads fail with a reset connection.
    pub fn fail_reads(&self, count: u32) {
        self.state.lock().unwrap().failing_reads = count;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().unwrap().fail_writes = fail;
    }

    pub fn refuse_connects(&self, refuse: bool) {
        self.state.lock().unwrap().refuse_connects = refuse;
    }

    pub fn writes(&self) -> Vec<(u16, Vec<u16>)> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn last_write(&self) -> Option<(u16, Vec<u16>)> {
        self.state.lock().unwrap().writes.last().cloned()
    }

    pub fn reads(&self) -> u64 {
        self.state.lock().unwrap().reads
    }

    pub fn connects(&self) -> u64 {
        self.state.lock().unwrap().connects
    }
}

pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError> {
        let mut state = self.state.lock().unwrap();
        if state.refuse_connects {
            return Err(std::io::Error::from(std::io::ErrorKind::ConnectionRefused).into());
        }
        state.connects += 1;
        Ok(Box::new(MockTransport {
            state: self.state.clone(),
        }))
    }

    fn peer(&self) -> String {
        "mock:502".to_owned()
    }
}

struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    fn write(&self, address: u16, values: &[u16]) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes {
            return Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe).into());
        }
        for (i, value) in values.iter().enumerate() {
            state.registers.insert(address + i as u16, *value);
        }
        state.writes.push((address, values.to_vec()));
        Ok(())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn read_holding_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.reads += 1;
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(std::io::Error::from(std::io::ErrorKind::ConnectionReset).into());
        }
        Ok((address..address + count)
            .map(|a| state.registers.get(&a).copied().unwrap_or(0))
            .collect())
    }

    async fn write_single_register(&mut self, address: u16, value: u16) -> Result<(), TransportError> {
        self.write(address, &[value])
    }

    async fn write_multiple_registers(&mut self, address: u16, values: &[u16]) -> Result<(), TransportError> {
        self.write(address, values)
    }
}
