//! Fake cluster manager for integration tests.
//!
//! Speaks just enough HTTP/1.1 for the scheduler client: SUBSCRIBE gets a
//! chunked RecordIO stream fed from [`FakeMaster::push`]; every other call
//! is recorded and answered with a configurable status.

#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use berth_proto::{encode_record, Call, CallType, Event, STREAM_ID_HEADER};
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

enum Frame {
    Record(Bytes),
    Close,
}

#[derive(Clone)]
struct Shared {
    calls: Arc<Mutex<Vec<Call>>>,
    frames: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Frame>>>,
    call_status: u16,
}

pub struct FakeMaster {
    pub addr: SocketAddr,
    shared: Shared,
    frames_tx: mpsc::UnboundedSender<Frame>,
}

impl FakeMaster {
    /// Start answering non-SUBSCRIBE calls with `202 Accepted`.
    pub async fn start() -> Self {
        Self::with_call_status(202).await
    }

    pub async fn with_call_status(call_status: u16) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let shared = Shared {
            calls: Arc::new(Mutex::new(Vec::new())),
            frames: Arc::new(tokio::sync::Mutex::new(frames_rx)),
            call_status,
        };

        let accept_shared = shared.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let shared = accept_shared.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, shared).await;
                });
            }
        });

        Self {
            addr,
            shared,
            frames_tx,
        }
    }

    pub fn leader(&self) -> String {
        self.addr.to_string()
    }

    /// Queue an event on the subscription stream.
    pub fn push(&self, event: &Event) {
        let json = serde_json::to_vec(event).unwrap();
        let _ = self.frames_tx.send(Frame::Record(encode_record(&json)));
    }

    /// Queue raw bytes on the subscription stream.
    pub fn push_raw(&self, bytes: &'static [u8]) {
        let _ = self.frames_tx.send(Frame::Record(Bytes::from_static(bytes)));
    }

    /// End the current subscription stream.
    pub fn close_stream(&self) {
        let _ = self.frames_tx.send(Frame::Close);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.shared.calls.lock().unwrap().clone()
    }

    pub fn calls_of(&self, call_type: CallType) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.call_type == call_type)
            .collect()
    }

    /// Wait until at least `count` calls of `call_type` were received.
    pub async fn wait_for(&self, call_type: CallType, count: usize) -> Vec<Call> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let calls = self.calls_of(call_type);
            if calls.len() >= count {
                return calls;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {count} {call_type:?} calls; got {:?}",
                self.calls().iter().map(|c| c.call_type).collect::<Vec<_>>()
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

async fn serve(mut stream: TcpStream, shared: Shared) -> io::Result<()> {
    let mut buf = Vec::new();
    while let Some(body) = read_request(&mut stream, &mut buf).await? {
        let call: Call = serde_json::from_slice(&body)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let subscribe = call.call_type == CallType::Subscribe;
        shared.calls.lock().unwrap().push(call);

        if subscribe {
            return stream_events(stream, shared).await;
        }

        let reason = if shared.call_status == 202 { "Accepted" } else { "Bad Request" };
        let response = format!(
            "HTTP/1.1 {} {reason}\r\ncontent-length: 0\r\n\r\n",
            shared.call_status
        );
        stream.write_all(response.as_bytes()).await?;
    }
    Ok(())
}

async fn stream_events(mut stream: TcpStream, shared: Shared) -> io::Result<()> {
    let head = format!(
        "HTTP/1.1 200 OK\r\ncontent-type: application/recordio\r\n{STREAM_ID_HEADER}: stream-1\r\ntransfer-encoding: chunked\r\n\r\n"
    );
    stream.write_all(head.as_bytes()).await?;

    let mut frames = shared.frames.lock().await;
    while let Some(frame) = frames.recv().await {
        match frame {
            Frame::Record(bytes) => {
                stream
                    .write_all(format!("{:x}\r\n", bytes.len()).as_bytes())
                    .await?;
                stream.write_all(&bytes).await?;
                stream.write_all(b"\r\n").await?;
            }
            Frame::Close => {
                stream.write_all(b"0\r\n\r\n").await?;
                return Ok(());
            }
        }
    }
    Ok(())
}

/// Read one request; returns its body, or None on a closed connection.
async fn read_request(stream: &mut TcpStream, buf: &mut Vec<u8>) -> io::Result<Option<Vec<u8>>> {
    loop {
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_string();
            let len = head
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
                .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                .unwrap_or(0);

            let total = end + 4 + len;
            while buf.len() < total {
                if !fill(stream, buf).await? {
                    return Ok(None);
                }
            }
            let body = buf[end + 4..total].to_vec();
            buf.drain(..total);
            return Ok(Some(body));
        }
        if !fill(stream, buf).await? {
            return Ok(None);
        }
    }
}

async fn fill(stream: &mut TcpStream, buf: &mut Vec<u8>) -> io::Result<bool> {
    let mut chunk = [0u8; 8192];
    let n = stream.read(&mut chunk).await?;
    buf.extend_from_slice(&chunk[..n]);
    Ok(n > 0)
}
