//! Tokio framing over the RTSP message codec.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use wfdcast_protocol::rtsp::{self, ParseOutcome, RtspMessage};

use crate::error::SourceError;

/// Allowed lower transports for the media stream.
pub const TRANSPORT_UDP: u8 = 1 << 0;
pub const TRANSPORT_UDP_MCAST: u8 = 1 << 1;
pub const TRANSPORT_TCP: u8 = 1 << 2;
pub const DEFAULT_TRANSPORT_MASK: u8 = TRANSPORT_UDP | TRANSPORT_UDP_MCAST | TRANSPORT_TCP;

const READ_CHUNK: usize = 4096;

/// Which transport bit a sink's Transport header asks for.
pub fn requested_transport(transport: &str) -> u8 {
    if transport.contains("TCP") {
        TRANSPORT_TCP
    } else if transport.contains("multicast") {
        TRANSPORT_UDP_MCAST
    } else {
        TRANSPORT_UDP
    }
}

/// One RTSP control connection to a sink.
pub struct RtspConnection<S> {
    stream: S,
    inbuf: BytesMut,
}

impl<S: AsyncRead + AsyncWrite + Unpin> RtspConnection<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            inbuf: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    pub async fn send(&mut self, msg: &RtspMessage) -> Result<(), SourceError> {
        let bytes = msg.serialize();
        tracing::trace!(len = bytes.len(), "rtsp send");
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read the next complete message, buffering partial reads.
    pub async fn recv(&mut self) -> Result<RtspMessage, SourceError> {
        loop {
            match rtsp::parse(&self.inbuf)? {
                ParseOutcome::Complete(msg, used) => {
                    let _ = self.inbuf.split_to(used);
                    return Ok(msg);
                }
                ParseOutcome::Incomplete => {
                    let n = self.stream.read_buf(&mut self.inbuf).await?;
                    if n == 0 {
                        return Err(SourceError::Transport(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "connection closed by sink",
                        )));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wfdcast_protocol::rtsp::{Method, Request, Response};

    #[test]
    fn transport_header_classification() {
        assert_eq!(
            requested_transport("RTP/AVP/UDP;unicast;client_port=19000-19001"),
            TRANSPORT_UDP
        );
        assert_eq!(
            requested_transport("RTP/AVP/UDP;multicast;port=5000-5001"),
            TRANSPORT_UDP_MCAST
        );
        assert_eq!(
            requested_transport("RTP/AVP/TCP;interleaved=0-1"),
            TRANSPORT_TCP
        );
        // Every default transport is accepted
        for t in [TRANSPORT_UDP, TRANSPORT_UDP_MCAST, TRANSPORT_TCP] {
            assert_ne!(t & DEFAULT_TRANSPORT_MASK, 0);
        }
    }

    #[tokio::test]
    async fn sends_and_receives_messages() {
        let (client, server) = tokio::io::duplex(4096);
        let mut source_side = RtspConnection::new(client);
        let mut sink_side = RtspConnection::new(server);

        let req = Request::new(Method::Options, "*")
            .header("CSeq", "1")
            .header("Require", "org.wfa.wfd1.0");
        source_side
            .send(&RtspMessage::Request(req.clone()))
            .await
            .unwrap();

        match sink_side.recv().await.unwrap() {
            RtspMessage::Request(got) => assert_eq!(got, req),
            other => panic!("expected request, got {other:?}"),
        }

        let resp = Response::ok().header("CSeq", "1");
        sink_side
            .send(&RtspMessage::Response(resp.clone()))
            .await
            .unwrap();
        match source_side.recv().await.unwrap() {
            RtspMessage::Response(got) => assert_eq!(got, resp),
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn reassembles_split_messages() {
        let (mut client, server) = tokio::io::duplex(4096);
        let mut sink_side = RtspConnection::new(server);

        let req = Request::new(Method::SetParameter, "rtsp://h/wfd1.0")
            .header("CSeq", "4")
            .body("wfd_trigger_method: SETUP\r\n");
        let bytes = req.serialize();
        let (a, b) = bytes.split_at(bytes.len() / 2);

        use tokio::io::AsyncWriteExt;
        client.write_all(a).await.unwrap();
        let recv = tokio::spawn(async move { sink_side.recv().await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        client.write_all(b).await.unwrap();

        match recv.await.unwrap().unwrap() {
            RtspMessage::Request(got) => assert_eq!(got, req),
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn closed_peer_is_a_transport_failure() {
        let (client, server) = tokio::io::duplex(64);
        let mut sink_side = RtspConnection::new(server);
        drop(client);
        match sink_side.recv().await {
            Err(SourceError::Transport(e)) => {
                assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof);
            }
            other => panic!("expected transport failure, got {other:?}"),
        }
    }
}
