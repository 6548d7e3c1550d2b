//! UDP unicast echo and UDP multicast fan-out through `MessageChannel`,
//! exercising the `Transport::Udp`/`Transport::UdpMulticast` wiring in
//! `ServerChannel::bind`/`connect` end to end over real loopback sockets.

use bytes::Bytes;
use channels::prelude::*;
use std::net::UdpSocket;
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
                let from = input.attachment(seq);
                let Ok(out_seq) = output.acquire(&stopping) else { return };
                *output.slot_mut(out_seq) = frame;
                output.attach(out_seq, from);
                output.release(out_seq);
            }
            input.release_through(high);
        }
    });
}

#[test]
fn udp_echoes_a_hundred_datagrams_in_order() {
    let pool = SelectorPool::new(2).expect("selector pool");
    let config = Arc::new(ChannelBuilder::new(Transport::Udp).capacity(256).build().unwrap());

    let addr = "127.0.0.1:18905".parse().unwrap();
    let (server, bind_future) = ServerChannel::bind(&pool, config.clone(), addr).unwrap();
    server.on_accept(|channel: MessageChannel| spawn_echo_handler(&channel));
    bind_future.wait().unwrap();

    let (client, connect_future) = connect(&pool, config, addr).unwrap();
    connect_future.wait().unwrap();

    let stopping = AtomicBool::new(false);
    let producer = client.output_buffer();
    let payload = Bytes::from_static(&[0xaa, 0xbb, 0xcc]);
    for _ in 0..100 {
        let seq = producer.acquire(&stopping).unwrap();
        *producer.slot_mut(seq) = payload.clone();
        producer.release(seq);
    }

    let mut consumer = client.input_buffer();
    let mut received = Vec::with_capacity(100);
    while received.len() < 100 {
        let Some((low, high)) = consumer.wait(&stopping) else { break };
        for seq in low..=high {
            received.push(consumer.get(seq).clone());
        }
        consumer.release_through(high);
    }

    assert_eq!(received.len(), 100);
    assert!(received.iter().all(|frame| frame == &payload));

    std::thread::sleep(Duration::from_millis(50));
    pool.shutdown();
}

#[test]
fn multicast_group_fans_every_datagram_out_to_all_subscriber_channels() {
    let pool = SelectorPool::new(1).expect("selector pool");
    let config = Arc::new(ChannelBuilder::new(Transport::UdpMulticast).pool_size(3).capacity(64).build().unwrap());

    let group_addr = "230.0.0.2:18906".parse().unwrap();
    let (server, bind_future) = ServerChannel::bind(&pool, config, group_addr).unwrap();

    let subscribers = Arc::new(std::sync::Mutex::new(Vec::new()));
    let collected = subscribers.clone();
    server.on_accept(move |channel: MessageChannel| {
        collected.lock().unwrap().push(channel);
    });
    bind_future.wait().unwrap();

    let channels = subscribers.lock().unwrap();
    assert_eq!(channels.len(), 3);

    let sender = UdpSocket::bind("0.0.0.0:0").unwrap();
    let frames: Vec<Bytes> = (0..20u8).map(|i| Bytes::copy_from_slice(&[i, i.wrapping_mul(3)])).collect();
    for frame in &frames {
        sender.send_to(frame, "230.0.0.2:18906").unwrap();
        std::thread::sleep(Duration::from_millis(2));
    }

    let stopping = AtomicBool::new(false);
    for channel in channels.iter() {
        let mut consumer = channel.input_buffer();
        let mut observed = Vec::with_capacity(frames.len());
        while observed.len() < frames.len() {
            let Some((low, high)) = consumer.wait(&stopping) else { break };
            for seq in low..=high {
                observed.push(consumer.get(seq).clone());
            }
            consumer.release_through(high);
        }
        assert_eq!(observed, frames);
    }

    drop(channels);
    pool.shutdown();
}
