//! Reading sources
//!
//! The heart rate sensor itself lives outside the relay. A [`ReadingSource`]
//! delivers samples to registered listeners; [`ListenerGuard`] ties a
//! registration to a scope so the listener is removed however that scope
//! ends.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use uuid::Uuid;

use crate::types::heartrate::Reading;

pub type ReadingListener = Box<dyn Fn(Reading) + Send + Sync>;

/// Something that emits heart rate readings.
pub trait ReadingSource: Send + Sync {
    /// Register a listener. Returns an id for [`ReadingSource::unregister`].
    fn register(&self, listener: ReadingListener) -> Uuid;

    fn unregister(&self, id: Uuid);
}

/// Keeps a listener registered for as long as the guard lives.
pub struct ListenerGuard {
    source: Arc<dyn ReadingSource>,
    id: Uuid,
}

impl ListenerGuard {
    pub fn register(source: Arc<dyn ReadingSource>, listener: ReadingListener) -> Self {
        let id = source.register(listener);
        Self { source, id }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.source.unregister(self.id);
        log::debug!("Reading listener {} unregistered", self.id);
    }
}

/// Demo sensor producing resting-range heart rates.
pub struct SimulatedSensor {
    listeners: Mutex<HashMap<Uuid, ReadingListener>>,
    cadence: Duration,
}

impl SimulatedSensor {
    pub fn new(cadence: Duration) -> Arc<Self> {
        Arc::new(Self {
            listeners: Mutex::new(HashMap::new()),
            cadence,
        })
    }

    /// Deliver one reading, captured now, to every listener.
    pub fn emit(&self, value: f32) {
        self.emit_reading(Reading::now(value));
    }

    pub fn emit_reading(&self, reading: Reading) {
        if let Ok(listeners) = self.listeners.lock() {
            for listener in listeners.values() {
                listener(reading);
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }

    /// Emit a varying heart rate every `cadence` until the task is aborted.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let sensor = Arc::clone(self);
        tokio::spawn(async move {
            let mut bpm = 72.0f32;
            let mut count = 0u32;
            loop {
                sleep(sensor.cadence).await;
                bpm += (count as f32 * 0.05).sin() * 3.0 + (count as f32 * 0.1).cos() * 1.5;
                bpm = bpm.clamp(65.0, 85.0);
                sensor.emit(bpm);
                count = count.wrapping_add(1);
            }
        })
    }
}

impl ReadingSource for SimulatedSensor {
    fn register(&self, listener: ReadingListener) -> Uuid {
        let id = Uuid::new_v4();
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.insert(id, listener);
        }
        id
    }

    fn unregister(&self, id: Uuid) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_guard_unregisters_on_drop() {
        let sensor = SimulatedSensor::new(Duration::from_secs(1));
        let hits = Arc::new(AtomicUsize::new(0));

        {
            let hits = Arc::clone(&hits);
            let _guard = ListenerGuard::register(
                sensor.clone(),
                Box::new(move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                }),
            );
            assert_eq!(sensor.listener_count(), 1);
            sensor.emit(70.0);
        }

        assert_eq!(sensor.listener_count(), 0);
        sensor.emit(71.0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_sensor_stays_in_resting_range() {
        let sensor = SimulatedSensor::new(Duration::from_secs(1));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _guard = ListenerGuard::register(
            sensor.clone(),
            Box::new(move |reading| {
                let _ = tx.send(reading);
            }),
        );

        let task = sensor.start();
        for _ in 0..20 {
            let reading = rx.recv().await.unwrap();
            assert!((65.0..=85.0).contains(&reading.value));
        }
        task.abort();
    }
}
