// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Message buses fed from several publisher threads.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use khora_threads::{AsyncBusConfig, AsyncMessageBus, SyncMessageBus};

#[derive(Debug)]
struct FrameRendered {
    producer: usize,
    frame: u64,
}

#[test]
fn test_async_bus_keeps_per_publisher_order() {
    let _ = env_logger::builder().is_test(true).try_init();
    let bus = Arc::new(
        AsyncMessageBus::new(AsyncBusConfig {
            name: "frame-bus".to_string(),
        })
        .expect("bus must start"),
    );
    let frames = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&frames);
    bus.subscribe(move |event: &FrameRendered| {
        sink.lock().unwrap().push((event.producer, event.frame));
    })
    .unwrap();

    let producers: Vec<_> = (0..4)
        .map(|producer| {
            let bus = Arc::clone(&bus);
            thread::spawn(move || {
                for frame in 0..500 {
                    bus.publish(FrameRendered { producer, frame }).unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().expect("producer panicked");
    }
    bus.flush().unwrap();

    let frames = frames.lock().unwrap();
    assert_eq!(frames.len(), 2_000);
    for producer in 0..4 {
        let order: Vec<_> = frames
            .iter()
            .filter(|(who, _)| *who == producer)
            .map(|(_, frame)| *frame)
            .collect();
        assert_eq!(order, (0..500).collect::<Vec<_>>());
    }
    assert_eq!(bus.stats().delivered, 2_000);
}

#[test]
fn test_sync_bus_is_shareable_across_threads() {
    let bus = Arc::new(SyncMessageBus::new());
    let total = Arc::new(AtomicU64::new(0));

    let sink = Arc::clone(&total);
    bus.subscribe(move |event: &FrameRendered| {
        sink.fetch_add(event.frame, Ordering::SeqCst);
    });

    let publishers: Vec<_> = (0..4)
        .map(|producer| {
            let bus = Arc::clone(&bus);
            thread::spawn(move || {
                for frame in 1..=100 {
                    bus.publish(&FrameRendered { producer, frame });
                }
            })
        })
        .collect();
    for publisher in publishers {
        publisher.join().expect("publisher panicked");
    }

    assert_eq!(total.load(Ordering::SeqCst), 4 * 5_050);
}
