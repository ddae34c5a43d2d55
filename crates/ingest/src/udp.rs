use anyhow::{Context, Result};
use log::{debug, warn};
use tokio::net::UdpSocket;

use telemetry::{RecordSender, TelemetryError, TelemetryRecord};

/// Largest datagram accepted; longer ones are truncated by the OS and then
/// fail to decode.
const MAX_DATAGRAM: usize = 64 * 1024;

/// Decodes one datagram and enqueues it. Undecodable payloads are logged and
/// dropped; only a closed queue is an error.
pub fn handle_datagram(payload: &[u8], sender: &RecordSender) -> Result<bool, TelemetryError> {
    match TelemetryRecord::from_json(payload) {
        Ok(record) => {
            sender.enqueue(record)?;
            Ok(true)
        }
        Err(e) => {
            warn!("Dropping undecodable datagram ({} bytes): {}", payload.len(), e);
            Ok(false)
        }
    }
}

/// Receives telemetry datagrams until the queue closes.
pub async fn serve(socket: UdpSocket, sender: RecordSender) -> Result<()> {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, peer) = socket.recv_from(&mut buf).await.context("UDP receive failed")?;
        debug!("{} bytes from {}", len, peer);
        handle_datagram(&buf[..len], &sender)?;
    }
}
