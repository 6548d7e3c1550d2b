//! S1: a client sends 1000 frames to an echoing server and observes them
//! back, in order, over real loopback TCP sockets.

use bytes::Bytes;
use channels::prelude::*;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

fn spawn_echo_handler(channel: &MessageChannel) {
    let output = channel.output_buffer();
    let mut input = channel.input_buffer();
    std::thread::spawn(move || {
        let stopping = AtomicBool::new(false);
        loop {
            let Some((low, high)) = input.wait(&stopping) else { break };
            for seq in low..=high {
                let frame = input.get(seq).clone();
                let Ok(out_seq) = output.acquire(&stopping) else { return };
                *output.slot_mut(out_seq) = frame;
                output.release(out_seq);
            }
            input.release_through(high);
        }
    });
}

#[test]
fn echoes_a_thousand_frames_in_order() {
    let pool = SelectorPool::new(2).expect("selector pool");
    let config = Arc::new(ChannelBuilder::new(Transport::Tcp).capacity(256).build().unwrap());

    let addr = "127.0.0.1:18901".parse().unwrap();
    let (server, bind_future) = ServerChannel::bind(&pool, config.clone(), addr).unwrap();
    server.on_accept(|channel: MessageChannel| spawn_echo_handler(&channel));
    bind_future.wait().unwrap();

    let (client, connect_future) = connect(&pool, config, addr).unwrap();
    connect_future.wait().unwrap();

    let stopping = AtomicBool::new(false);
    let producer = client.output_buffer();
    let payload = Bytes::from_static(&[0x01, 0x02, 0x03, 0x04]);
    for _ in 0..1000 {
        let seq = producer.acquire(&stopping).unwrap();
        *producer.slot_mut(seq) = payload.clone();
        producer.release(seq);
    }

    let mut consumer = client.input_buffer();
    let mut received = Vec::with_capacity(1000);
    while received.len() < 1000 {
        let Some((low, high)) = consumer.wait(&stopping) else { break };
        for seq in low..=high {
            received.push(consumer.get(seq).clone());
        }
        consumer.release_through(high);
    }

    assert_eq!(received.len(), 1000);
    assert!(received.iter().all(|frame| frame == &payload));

    std::thread::sleep(Duration::from_millis(50));
    pool.shutdown();
}
