//! Shared, thread-safe cache of weight-encoding results.
//!
//! Several parts (and several worker threads searching different cascade
//! lengths) routinely request the same encoding. The first request claims
//! the entry and does the work; everyone else blocks on the entry's condvar
//! and receives the same shared result. Stage 1 can additionally be kicked
//! off ahead of time on the thread pool so that by the time a plan needs the
//! result only the cheap stripe layout remains.

use std::sync::{Arc, Condvar, Mutex};

use hashbrown::HashMap;

use crate::components::caps::HardwareCapabilities;
use crate::components::weights::{
    encode_stage1, encode_stage2, EncodedWeights, Stage1Results, WeightEncodingRequest,
};
use stripegen_common::ThreadPool;

enum EntryState {
    /// Stage 1 is queued or running on the pool.
    Stage1Running,
    /// Stage 1 finished; stage 2 not yet claimed.
    Stage1Done(Stage1Results),
    /// Another caller is running stage 2 right now.
    Stage2Running,
    /// Final result; `None` means the encoding was infeasible.
    Finished(Option<Arc<EncodedWeights>>),
}

struct Entry {
    state: Mutex<EntryState>,
    ready: Condvar,
}

pub struct WeightEncoderCache {
    caps: HardwareCapabilities,
    entries: Mutex<HashMap<WeightEncodingRequest, Arc<Entry>>>,
    pool: Arc<ThreadPool>,
    /// Raw weight bytes per stripe above which compression cannot possibly
    /// bring the stripe under the SRAM budget, so encoding is skipped
    /// entirely.
    max_uncompressed_stripe_size: u64,
}

impl WeightEncoderCache {
    pub fn new(caps: HardwareCapabilities, pool: Arc<ThreadPool>) -> Self {
        Self {
            caps,
            entries: Mutex::new(HashMap::new()),
            pool,
            max_uncompressed_stripe_size: u64::from(caps.total_sram_size()),
        }
    }

    /// Whether the raw (pre-compression) size of one weight stripe already
    /// rules the request out.
    fn check_uncompressed_size(&self, request: &WeightEncodingRequest) -> bool {
        let num_ofms = request.weights_tensor_info.dimensions[3].max(1) as u64
            * match request.weights_tensor_info.data_format {
                crate::components::DataFormat::Hwim => {
                    request.weights_tensor_info.dimensions[2] as u64
                }
                _ => 1,
            };
        let bytes_per_ofm = if num_ofms == 0 {
            0
        } else {
            request.weights_data.len() as u64 / num_ofms
        };
        let stripe_ofms = u64::from(request.stripe_depth.max(1)).min(num_ofms);
        stripe_ofms * bytes_per_ofm <= self.max_uncompressed_stripe_size
    }

    /// Looks up or computes the encoding for `request`. Blocks if another
    /// thread is already computing it. `None` means the candidate plan is
    /// infeasible (stripe too big for SRAM).
    pub fn encode(&self, request: WeightEncodingRequest) -> Option<Arc<EncodedWeights>> {
        if !self.check_uncompressed_size(&request) {
            log::trace!(
                "Skipping weight encode: {} uncompressed bytes per stripe cannot fit SRAM",
                request.weights_data.len()
            );
            return None;
        }

        let (entry, claimed) = {
            let mut entries = self.entries.lock().unwrap();
            match entries.get(&request) {
                Some(entry) => (Arc::clone(entry), false),
                None => {
                    let entry = Arc::new(Entry {
                        state: Mutex::new(EntryState::Stage2Running),
                        ready: Condvar::new(),
                    });
                    entries.insert(request.clone(), Arc::clone(&entry));
                    (entry, true)
                }
            }
        };

        if claimed {
            // We inserted the entry, so both stages are ours to run.
            let result = encode_stage2(&self.caps, encode_stage1(&request));
            let mut state = entry.state.lock().unwrap();
            *state = EntryState::Finished(result.clone());
            entry.ready.notify_all();
            return result;
        }

        let mut state = entry.state.lock().unwrap();
        loop {
            match &*state {
                EntryState::Finished(result) => return result.clone(),
                EntryState::Stage1Done(_) => {
                    // Claim stage 2. Swap the state so concurrent callers
                    // wait instead of duplicating the work.
                    let stage1 =
                        match std::mem::replace(&mut *state, EntryState::Stage2Running) {
                            EntryState::Stage1Done(stage1) => stage1,
                            _ => unreachable!(),
                        };
                    drop(state);
                    let result = encode_stage2(&self.caps, stage1);
                    let mut state = entry.state.lock().unwrap();
                    *state = EntryState::Finished(result.clone());
                    entry.ready.notify_all();
                    return result;
                }
                EntryState::Stage1Running | EntryState::Stage2Running => {
                    state = entry.ready.wait(state).unwrap();
                }
            }
        }
    }

    /// Queues stage 1 of `request` on the pool if nothing has claimed the
    /// entry yet. A later [`WeightEncoderCache::encode`] of the same request
    /// then only runs the cheap stage 2.
    pub fn encode_stage1_async(&self, request: WeightEncodingRequest) {
        if !self.check_uncompressed_size(&request) {
            return;
        }

        let entry = {
            let mut entries = self.entries.lock().unwrap();
            if entries.contains_key(&request) {
                return;
            }
            let entry = Arc::new(Entry {
                state: Mutex::new(EntryState::Stage1Running),
                ready: Condvar::new(),
            });
            entries.insert(request.clone(), Arc::clone(&entry));
            entry
        };

        self.pool.execute(move || {
            let stage1 = encode_stage1(&request);
            let mut state = entry.state.lock().unwrap();
            *state = EntryState::Stage1Done(stage1);
            entry.ready.notify_all();
        });
    }

    #[cfg(test)]
    fn num_entries(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::weights::tests_support::depthwise_request;
    use pretty_assertions::assert_eq;

    #[test]
    fn identical_requests_share_one_result() {
        let cache = WeightEncoderCache::new(
            HardwareCapabilities::standard(),
            Arc::new(ThreadPool::new(0)),
        );
        let a = cache.encode(depthwise_request(64, 16)).unwrap();
        let b = cache.encode(depthwise_request(64, 16)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.num_entries(), 1);
    }

    #[test]
    fn different_stripe_depths_are_distinct_entries() {
        let cache = WeightEncoderCache::new(
            HardwareCapabilities::standard(),
            Arc::new(ThreadPool::new(0)),
        );
        cache.encode(depthwise_request(64, 16));
        cache.encode(depthwise_request(64, 32));
        assert_eq!(cache.num_entries(), 2);
    }

    #[test]
    fn stage1_async_then_encode_completes() {
        let cache = WeightEncoderCache::new(
            HardwareCapabilities::standard(),
            Arc::new(ThreadPool::new(2)),
        );
        cache.encode_stage1_async(depthwise_request(64, 16));
        let result = cache.encode(depthwise_request(64, 16));
        assert!(result.is_some());
        assert_eq!(cache.num_entries(), 1);
    }

    #[test]
    fn concurrent_encodes_agree() {
        let cache = Arc::new(WeightEncoderCache::new(
            HardwareCapabilities::standard(),
            Arc::new(ThreadPool::new(0)),
        ));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(std::thread::spawn(move || {
                cache.encode(depthwise_request(128, 16)).unwrap()
            }));
        }
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for pair in results.windows(2) {
            assert!(Arc::ptr_eq(&pair[0], &pair[1]));
        }
        assert_eq!(cache.num_entries(), 1);
    }
}
