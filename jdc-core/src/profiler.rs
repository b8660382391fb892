//! Network profiler — RTT sampling and chunk-size recommendation.
//!
//! Before the transfer begins, the client opens a second short-lived
//! connection and bounces up to five pings off the server. The averaged
//! RTT seeds a coarse bandwidth estimate, and the bandwidth-delay product
//! yields a recommended chunk size. Profiling is strictly best-effort: any
//! failure or timeout falls back to the configured defaults.

use std::time::{Duration, Instant};

use tokio::net::TcpStream;

use crate::protocol::Command;
use crate::protocol::wire::{FrameReader, FrameWriter};

/// Number of ping samples taken per profiling run.
const PING_COUNT: usize = 5;

/// Overall budget for the profiling connection.
const PROFILE_BUDGET: Duration = Duration::from_secs(5);

/// Chunk-size recommendation bounds.
pub const MIN_RECOMMENDED_CHUNK: u64 = 512 * 1024;
pub const MAX_RECOMMENDED_CHUNK: u64 = 8 * 1024 * 1024;

/// Result of a successful profiling run.
#[derive(Debug, Clone, Copy)]
pub struct NetworkProfile {
    pub avg_rtt: Duration,
    /// Estimated path bandwidth in bytes/second.
    pub bandwidth: u64,
    /// Recommended chunk size from the bandwidth-delay product.
    pub optimal_chunk_size: u64,
}

/// Coarse RTT→bandwidth table. Short RTTs usually mean a local segment
/// with plenty of headroom; long ones a constrained WAN path.
pub fn estimate_bandwidth(rtt: Duration) -> u64 {
    const MIB: u64 = 1024 * 1024;
    match rtt.as_millis() {
        0..10 => 50 * MIB,
        10..50 => 20 * MIB,
        50..100 => 10 * MIB,
        _ => 5 * MIB,
    }
}

/// Chunk size from the bandwidth-delay product, clamped to the supported
/// window and widened on long-RTT paths where per-chunk turnarounds hurt.
pub fn optimal_chunk_size(bandwidth: u64, rtt: Duration) -> u64 {
    let bdp = (bandwidth as f64 * rtt.as_secs_f64()) as u64;
    let mut size = bdp.clamp(MIN_RECOMMENDED_CHUNK, MAX_RECOMMENDED_CHUNK);
    if rtt > Duration::from_millis(50) {
        size = (size + size / 2).min(MAX_RECOMMENDED_CHUNK);
    }
    size
}

/// Profile the path to `address`. Returns `None` on any failure — the
/// transfer proceeds with defaults either way.
pub async fn profile(address: &str, buffer_size: usize) -> Option<NetworkProfile> {
    match tokio::time::timeout(PROFILE_BUDGET, sample_rtt(address, buffer_size)).await {
        Ok(Some(avg_rtt)) => {
            let bandwidth = estimate_bandwidth(avg_rtt);
            Some(NetworkProfile {
                avg_rtt,
                bandwidth,
                optimal_chunk_size: optimal_chunk_size(bandwidth, avg_rtt),
            })
        }
        Ok(None) => None,
        Err(_) => {
            tracing::debug!("network profiling timed out; using defaults");
            None
        }
    }
}

async fn sample_rtt(address: &str, buffer_size: usize) -> Option<Duration> {
    let stream = match TcpStream::connect(address).await {
        Ok(s) => s,
        Err(e) => {
            tracing::debug!(error = %e, "profiling connection failed");
            return None;
        }
    };
    let _ = stream.set_nodelay(true);
    let (read_half, write_half) = stream.into_split();
    let mut reader = FrameReader::new(read_half, buffer_size);
    let mut writer = FrameWriter::new(write_half, buffer_size);

    let mut total = Duration::ZERO;
    let mut samples = 0u32;
    for _ in 0..PING_COUNT {
        let started = Instant::now();
        if writer.write_command(Command::Ping).await.is_err() || writer.flush().await.is_err() {
            break;
        }
        match reader.read_command().await {
            Ok(Command::Pong) => {
                total += started.elapsed();
                samples += 1;
            }
            _ => break,
        }
    }

    if samples == 0 { None } else { Some(total / samples) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn bandwidth_table() {
        const MIB: u64 = 1024 * 1024;
        assert_eq!(estimate_bandwidth(Duration::from_millis(5)), 50 * MIB);
        assert_eq!(estimate_bandwidth(Duration::from_millis(20)), 20 * MIB);
        assert_eq!(estimate_bandwidth(Duration::from_millis(80)), 10 * MIB);
        assert_eq!(estimate_bandwidth(Duration::from_millis(100)), 5 * MIB);
        assert_eq!(estimate_bandwidth(Duration::from_millis(400)), 5 * MIB);
    }

    #[test]
    fn chunk_size_clamped() {
        // Tiny BDP clamps up to the floor.
        assert_eq!(
            optimal_chunk_size(50 * 1024 * 1024, Duration::from_millis(1)),
            MIN_RECOMMENDED_CHUNK
        );
        // Huge BDP clamps down to the ceiling.
        assert_eq!(
            optimal_chunk_size(50 * 1024 * 1024, Duration::from_secs(2)),
            MAX_RECOMMENDED_CHUNK
        );
    }

    #[test]
    fn long_rtt_widens_chunks() {
        let bandwidth = 10 * 1024 * 1024;
        let short = optimal_chunk_size(bandwidth, Duration::from_millis(40));
        let long = optimal_chunk_size(bandwidth, Duration::from_millis(80));
        // 40 ms: BDP ≈ 419 KiB → floor. 80 ms: BDP ≈ 838 KiB, then ×1.5.
        assert_eq!(short, MIN_RECOMMENDED_CHUNK);
        assert!(long > short);
        assert!(long <= MAX_RECOMMENDED_CHUNK);
    }

    #[tokio::test]
    async fn profile_against_pong_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, write_half) = stream.into_split();
            let mut reader = FrameReader::new(read_half, 4096);
            let mut writer = FrameWriter::new(write_half, 4096);
            while let Ok(Command::Ping) = reader.read_command().await {
                writer.write_command(Command::Pong).await.unwrap();
                writer.flush().await.unwrap();
            }
        });

        let profile = profile(&addr, 4096).await.expect("profiling should succeed");
        assert!(profile.bandwidth > 0);
        assert!(
            (MIN_RECOMMENDED_CHUNK..=MAX_RECOMMENDED_CHUNK)
                .contains(&profile.optimal_chunk_size)
        );
    }

    #[tokio::test]
    async fn unreachable_server_is_not_fatal() {
        // Port 1 on localhost is essentially never listening.
        assert!(profile("127.0.0.1:1", 4096).await.is_none());
    }
}
