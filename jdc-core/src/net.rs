//! Socket setup and deadline helpers.
//!
//! Options are applied once, right after accept/connect and before any
//! frame flows: Nagle off for request/response latency, keepalive so a
//! dead peer is noticed during long quiet stretches, and matched kernel
//! buffer sizes.

use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::error::TransferError;

/// Keepalive probe period.
const KEEPALIVE_PERIOD: Duration = Duration::from_secs(30);

/// Apply the transfer socket options. Buffer sizing failures are demoted
/// to a log line; some platforms clamp or refuse large values.
pub fn configure_stream(stream: &TcpStream, buffer_size: usize) -> Result<(), TransferError> {
    stream.set_nodelay(true)?;

    let sock = SockRef::from(stream);
    sock.set_keepalive(true)?;
    sock.set_tcp_keepalive(&TcpKeepalive::new().with_time(KEEPALIVE_PERIOD))?;
    if let Err(e) = sock.set_send_buffer_size(buffer_size) {
        tracing::debug!(error = %e, "could not size send buffer");
    }
    if let Err(e) = sock.set_recv_buffer_size(buffer_size) {
        tracing::debug!(error = %e, "could not size receive buffer");
    }
    Ok(())
}

/// Run `fut` under a deadline while observing the cancellation token.
///
/// Cancellation wins over completion when both are ready, so shutdown is
/// prompt even on a busy stream. A timeout maps to a retryable Network
/// error; cancellation is terminal.
pub async fn with_deadline<T, F>(
    token: &CancellationToken,
    deadline: Duration,
    fut: F,
) -> Result<T, TransferError>
where
    F: Future<Output = Result<T, TransferError>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(TransferError::Cancelled),
        result = tokio::time::timeout(deadline, fut) => match result {
            Ok(inner) => inner,
            Err(_) => Err(TransferError::Timeout(deadline)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn configure_accepted_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (server_stream, _) = listener.accept().await.unwrap();
        let client_stream = client.await.unwrap();

        configure_stream(&server_stream, 1024 * 1024).unwrap();
        configure_stream(&client_stream, 1024 * 1024).unwrap();
        assert!(server_stream.nodelay().unwrap());
    }

    #[tokio::test]
    async fn deadline_times_out() {
        let token = CancellationToken::new();
        let res: Result<(), _> = with_deadline(&token, Duration::from_millis(20), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        assert!(matches!(res, Err(TransferError::Timeout(_))));
    }

    #[tokio::test]
    async fn cancellation_beats_completion() {
        let token = CancellationToken::new();
        token.cancel();
        let res = with_deadline(&token, Duration::from_secs(60), async { Ok(7) }).await;
        assert!(matches!(res, Err(TransferError::Cancelled)));
    }

    #[tokio::test]
    async fn completion_passes_through() {
        let token = CancellationToken::new();
        let res = with_deadline(&token, Duration::from_secs(60), async { Ok(7) }).await;
        assert_eq!(res.unwrap(), 7);
    }
}
