use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use jensen_lib::{JensenError, KeyValueStore, UsbBackend};

/// Scripted USB backend for end-to-end tests: plays back a fixed sequence
/// of inbound reads and records every outbound write.
#[derive(Clone)]
pub struct FakeBackend {
    inbound: Arc<Mutex<VecDeque<Vec<u8>>>>,
    outbound: Arc<Mutex<Vec<Vec<u8>>>>,
    connected: Arc<Mutex<bool>>,
}

impl FakeBackend {
    pub fn new(reads: Vec<Vec<u8>>) -> Self {
        Self {
            inbound: Arc::new(Mutex::new(reads.into())),
            outbound: Arc::new(Mutex::new(Vec::new())),
            connected: Arc::new(Mutex::new(true)),
        }
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.outbound.lock().unwrap().clone()
    }

    pub fn push_read(&self, bytes: Vec<u8>) {
        self.inbound.lock().unwrap().push_back(bytes);
    }
}

impl UsbBackend for FakeBackend {
    async fn write(&mut self, data: &[u8], _timeout: Duration) -> Result<(), JensenError> {
        self.outbound.lock().unwrap().push(data.to_vec());
        Ok(())
    }

    async fn read(&mut self, _max_len: usize, _timeout: Duration) -> Result<Vec<u8>, JensenError> {
        match self.inbound.lock().unwrap().pop_front() {
            Some(bytes) => Ok(bytes),
            None => Err(JensenError::Timeout),
        }
    }

    async fn clear_halt(&mut self) -> Result<(), JensenError> {
        Ok(())
    }

    async fn close(&mut self) {
        *self.connected.lock().unwrap() = false;
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock().unwrap()
    }
}

#[derive(Default)]
pub struct MemoryStore(Mutex<HashMap<String, String>>);

impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Option<String> {
        self.0.lock().unwrap().get(key).cloned()
    }
    async fn set(&self, key: &str, value: String) {
        self.0.lock().unwrap().insert(key.to_string(), value);
    }
    async fn delete(&self, key: &str) {
        self.0.lock().unwrap().remove(key);
    }
}
