//! Decode loop: subscription body → event channel.

use berth_proto::{Event, EventType, RecordIoCodec};
use futures_util::{StreamExt, TryStreamExt};
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ClusterEvent, ConnectorError};

/// Read RecordIO frames from `response` and forward decoded events.
///
/// Sends block while the channel is full, which stops reading from the
/// network; events are never dropped or reordered. Framing errors,
/// malformed events and end of stream are reported on `failures`.
pub(super) async fn decode_loop(
    response: reqwest::Response,
    events: mpsc::Sender<ClusterEvent>,
    cancel: CancellationToken,
    failures: mpsc::Sender<ConnectorError>,
    max_record_len: usize,
) {
    let body = response.bytes_stream().map_err(std::io::Error::other);
    let mut frames = std::pin::pin!(FramedRead::new(
        StreamReader::new(body),
        RecordIoCodec::new(max_record_len),
    ));

    let failure = loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => {
                info!("Decode loop cancelled");
                return;
            }
            frame = frames.next() => frame,
        };

        let record = match frame {
            Some(Ok(record)) => record,
            Some(Err(e)) => break ConnectorError::Framing(e),
            None => break ConnectorError::StreamEnded,
        };

        let event: Event = match serde_json::from_slice(&record) {
            Ok(event) => event,
            Err(e) => break ConnectorError::Decode(e),
        };

        if event.event_type == EventType::Unknown {
            debug!("Skipping event of unknown type");
            continue;
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Decode loop cancelled while delivering");
                return;
            }
            sent = events.send(ClusterEvent::new(event)) => {
                if sent.is_err() {
                    info!("Event channel closed; ending decode loop");
                    return;
                }
            }
        }
    };

    if cancel.is_cancelled() {
        return;
    }
    warn!(error = %failure, "Event stream failed");
    let _ = failures.send(failure).await;
}
