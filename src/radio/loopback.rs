//! In-memory broadcast medium.
//!
//! Every [`LoopbackRadio`] attached to the same [`LoopbackMedium`] hears the
//! bursts of every other listening radio. The medium can repeat each burst
//! (a scanner sees one advertisement many times) and drop payloads through a
//! filter, which is enough to exercise dedup and re-send paths without hardware.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;

use super::{Address, ScanResult, ScanSink, Transport, TransportError};

/// Returns false for payloads the medium should lose.
pub type DeliveryFilter = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

#[derive(Default)]
struct Station {
    address: Address,
    sink: Option<ScanSink>,
    listening: bool,
    want_duplicates: bool,
    last_heard: Option<(Address, Bytes)>,
}

struct MediumState {
    stations: Vec<Station>,
    copies: usize,
    rssi: i8,
    realtime: bool,
    filter: Option<DeliveryFilter>,
}

#[derive(Clone)]
pub struct LoopbackMedium {
    state: Arc<Mutex<MediumState>>,
}

fn relock(m: &Mutex<MediumState>) -> MutexGuard<'_, MediumState> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl LoopbackMedium {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MediumState {
                stations: Vec::new(),
                copies: 1,
                rssi: -48,
                realtime: false,
                filter: None,
            })),
        }
    }

    /// Deliver every burst `copies` times to each listener.
    pub fn with_copies(self, copies: usize) -> Self {
        relock(&self.state).copies = copies.max(1);
        self
    }

    /// Sleep for the burst duration in `advertise`, as real hardware blocks.
    pub fn with_realtime(self, realtime: bool) -> Self {
        relock(&self.state).realtime = realtime;
        self
    }

    pub fn set_filter(&self, filter: Option<DeliveryFilter>) {
        relock(&self.state).filter = filter;
    }

    /// Attach a new radio with a locally administered address.
    pub fn radio(&self) -> LoopbackRadio {
        let mut state = relock(&self.state);
        let index = state.stations.len();
        let address = Address([0x02, 0x00, 0x00, 0x00, (index >> 8) as u8, index as u8]);
        state.stations.push(Station {
            address,
            ..Station::default()
        });
        LoopbackRadio {
            medium: self.clone(),
            index,
            address,
        }
    }
}

impl Default for LoopbackMedium {
    fn default() -> Self {
        Self::new()
    }
}

pub struct LoopbackRadio {
    medium: LoopbackMedium,
    index: usize,
    address: Address,
}

impl LoopbackRadio {
    pub fn address(&self) -> Address {
        self.address
    }

    fn with_station<R>(&self, f: impl FnOnce(&mut Station) -> R) -> R {
        let mut state = relock(&self.medium.state);
        f(&mut state.stations[self.index])
    }
}

impl Transport for LoopbackRadio {
    fn set_scan_sink(&mut self, sink: ScanSink) {
        self.with_station(|s| s.sink = Some(sink));
    }

    fn start_listening(&mut self, want_duplicates: bool) -> Result<(), TransportError> {
        self.with_station(|s| {
            s.listening = true;
            s.want_duplicates = want_duplicates;
            s.last_heard = None;
        });
        Ok(())
    }

    fn stop_listening(&mut self) -> Result<(), TransportError> {
        self.with_station(|s| s.listening = false);
        Ok(())
    }

    fn is_listening(&self) -> bool {
        self.with_station(|s| s.listening)
    }

    fn advertise(&mut self, payload: &[u8], duration: Duration) -> Result<(), TransportError> {
        if payload.is_empty() {
            return Err(TransportError::EmptyPayload);
        }
        let data = Bytes::copy_from_slice(payload);
        let (deliveries, realtime) = {
            let mut state = relock(&self.medium.state);
            let copies = state.copies;
            let rssi = state.rssi;
            let passes = state.filter.as_ref().map_or(true, |f| f(payload));
            let mut deliveries = Vec::new();
            if passes {
                for (i, station) in state.stations.iter_mut().enumerate() {
                    if i == self.index || !station.listening {
                        continue;
                    }
                    let Some(sink) = station.sink.clone() else { continue };
                    let heard = (self.address, data.clone());
                    // Scanners without duplicate reporting collapse repeats
                    // of the last advertisement from the same origin.
                    let n = if station.want_duplicates {
                        copies
                    } else if station.last_heard.as_ref() == Some(&heard) {
                        0
                    } else {
                        1
                    };
                    station.last_heard = Some(heard);
                    for _ in 0..n {
                        deliveries.push((sink.clone(), ScanResult::new(data.clone(), rssi, self.address)));
                    }
                }
            }
            (deliveries, state.realtime)
        };
        // Sinks run outside the medium lock so they may transmit in turn.
        for (sink, result) in deliveries {
            sink(result);
        }
        if realtime {
            std::thread::sleep(duration);
        }
        Ok(())
    }
}
