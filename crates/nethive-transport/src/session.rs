//! The stream session: the two-way copy between a peer's QUIC stream and
//! its packet channel.

use iroh::endpoint::{RecvStream, SendStream};
use nethive_core::Payload;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::framing::{self, FrameResult};

/// Runs both directions of a stream session to completion.
///
/// `outbound` is drained and written to `send`; bytes read from `recv` are
/// framed back into `Payload`s and pushed to `inbound`. Either direction
/// exiting closes the stream, which unblocks the other.
pub async fn run_session(
    send: SendStream,
    recv: RecvStream,
    outbound: mpsc::Receiver<Payload>,
    inbound: mpsc::Sender<Payload>,
) {
    let writer = write_loop(send, outbound);
    let reader = read_loop(recv, inbound);
    tokio::join!(writer, reader);
}

async fn write_loop(mut send: SendStream, mut outbound: mpsc::Receiver<Payload>) {
    while let Some(payload) = outbound.recv().await {
        let framed = match framing::frame(&payload.data) {
            Ok(framed) => framed,
            Err(err) => {
                warn!(error = %err, "dropping oversized outbound payload");
                continue;
            }
        };
        if let Err(err) = send.write_all(&framed).await {
            warn!(error = %err, "stream write failed, closing session");
            break;
        }
    }
    let _ = send.finish();
    debug!("session writer exiting");
}

async fn read_loop(mut recv: RecvStream, inbound: mpsc::Sender<Payload>) {
    let mut buf = Vec::new();
    let mut chunk = vec![0u8; 64 * 1024];

    loop {
        match recv.read(&mut chunk).await {
            Ok(Some(n)) if n > 0 => buf.extend_from_slice(&chunk[..n]),
            Ok(_) => {
                debug!("stream EOF, session reader exiting");
                break;
            }
            Err(err) => {
                warn!(error = %err, "stream read failed, session reader exiting");
                break;
            }
        }

        loop {
            match framing::try_parse_frame(&buf) {
                Ok(FrameResult::Frame { payload, consumed }) => {
                    let data = payload.to_vec();
                    let consumed = consumed;
                    match Payload::from_datagram(data) {
                        Ok(payload) => {
                            if inbound.try_send(payload).is_err() {
                                warn!("interface-write channel full or closed, dropping inbound packet");
                            }
                        }
                        Err(err) => warn!(error = %err, "dropping malformed inbound packet"),
                    }
                    buf.drain(..consumed);
                }
                Ok(FrameResult::Incomplete) => break,
                Err(err) => {
                    warn!(error = %err, "framing error, session reader exiting");
                    return;
                }
            }
        }
    }
}
