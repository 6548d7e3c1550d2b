//! S3: pushing a fixed amount of data against a byte-rate limiter should
//! take roughly `total / rate` seconds, not less (burst) and not much more
//! (starvation). Scaled down from the 100 KiB/10 KiB/s scenario to keep the
//! test fast; the ratio (10x the rate, one second worth of data split
//! across refill-sized chunks) is preserved.

use channels::config::RateLimit;
use channels::prelude::*;
use channels::rate_limiter::RateLimiter;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

#[test]
fn steady_state_send_rate_matches_configured_budget() {
    let rate_bytes_per_sec: u64 = 2_000;
    let config = ChannelBuilder::new(Transport::Tcp)
        .rate_limit(RateLimit::BytesPerSecond { send: rate_bytes_per_sec, receive: rate_bytes_per_sec })
        .build()
        .unwrap();
    let limiter = config.rate_limiter();
    let stopping = AtomicBool::new(false);

    // One second's worth of data, in chunks small enough that no single
    // `acquire_send` ever asks for more than the bucket can ever hold.
    let chunk = 100usize;
    let chunks = rate_bytes_per_sec as usize / chunk;

    // The bucket starts full (bursts up to the configured rate are allowed);
    // drain that initial allowance first so the timed batch below is paced
    // entirely by refills, not by leftover burst capacity.
    for _ in 0..chunks {
        limiter.acquire_send(chunk, &stopping).unwrap();
    }

    let started = Instant::now();
    for _ in 0..chunks {
        limiter.acquire_send(chunk, &stopping).unwrap();
    }
    let elapsed = started.elapsed();

    assert!(elapsed.as_millis() >= 700, "drained the whole budget too fast: {elapsed:?}");
    assert!(elapsed.as_millis() <= 1_500, "rate limiter starved the sender: {elapsed:?}");
}
