//! QUIC transport task.
//!
//! Bridges a [`Link`] to a quinn connection: envelopes are CBOR-encoded
//! with a 4-byte big-endian length prefix on one long-lived bidirectional
//! stream. The task owns dialing and redialing; the client decides *when*
//! to dial via [`LinkCommand`], so reconnect policy stays in the pure
//! connection machine.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use bytes::BytesMut;
use quinn::{Endpoint, RecvStream, SendStream};
use tally_proto::Envelope;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::link::{LINK_CHANNEL_CAPACITY, Link, LinkCommand, LinkEvent};

/// ALPN protocol identifier; must match the clearing endpoint.
pub const ALPN: &[u8] = b"tally";

/// Upper bound on a single envelope, to cap the read buffer.
const MAX_ENVELOPE_BYTES: u32 = 1 << 20;

const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Dialing or maintaining the connection failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Stream read or write failed.
    #[error("stream error: {0}")]
    Stream(String),

    /// Framing or envelope decoding failed.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Spawn the transport task for the given clearing endpoint.
///
/// The returned [`Link`] is idle until the client issues
/// [`LinkCommand::Dial`]. `server_name` is the TLS name presented by the
/// endpoint.
#[must_use]
pub fn spawn(server_addr: SocketAddr, server_name: String) -> Link {
    let (to_remote_tx, to_remote_rx) = mpsc::channel(LINK_CHANNEL_CAPACITY);
    let (events_tx, events_rx) = mpsc::channel(LINK_CHANNEL_CAPACITY);
    let (control_tx, control_rx) = mpsc::channel(8);

    tokio::spawn(run_transport(server_addr, server_name, to_remote_rx, events_tx, control_rx));

    Link::from_channels(to_remote_tx, events_rx, control_tx)
}

enum LinkExit {
    /// Caller-initiated close; the task stops.
    Closed,
    /// The connection was lost.
    Lost(String),
}

async fn run_transport(
    server_addr: SocketAddr,
    server_name: String,
    mut to_remote: mpsc::Receiver<Envelope>,
    events: mpsc::Sender<LinkEvent>,
    mut control: mpsc::Receiver<LinkCommand>,
) {
    loop {
        // Idle until the client asks for a dial.
        match control.recv().await {
            None | Some(LinkCommand::Close) => return,
            Some(LinkCommand::Dial) => {},
        }

        let connection = match dial(server_addr, &server_name).await {
            Ok(connection) => connection,
            Err(err) => {
                debug!(%err, "dial failed");
                if events.send(LinkEvent::Down { reason: err.to_string() }).await.is_err() {
                    return;
                }
                continue;
            },
        };

        if events.send(LinkEvent::Up).await.is_err() {
            return;
        }

        match run_link(&connection, &mut to_remote, &events, &mut control).await {
            LinkExit::Closed => {
                connection.close(0u32.into(), b"client close");
                return;
            },
            LinkExit::Lost(reason) => {
                warn!(%reason, "link lost");
                if events.send(LinkEvent::Down { reason }).await.is_err() {
                    return;
                }
            },
        }
    }
}

async fn run_link(
    connection: &quinn::Connection,
    to_remote: &mut mpsc::Receiver<Envelope>,
    events: &mpsc::Sender<LinkEvent>,
    control: &mut mpsc::Receiver<LinkCommand>,
) -> LinkExit {
    let (mut send, recv) = match connection.open_bi().await {
        Ok(streams) => streams,
        Err(err) => return LinkExit::Lost(format!("open stream failed: {err}")),
    };

    // Reads run on their own task: a partially read frame must never be
    // abandoned by a select race.
    let mut reader = tokio::spawn(read_loop(recv, events.clone()));

    let exit = loop {
        tokio::select! {
            cmd = control.recv() => match cmd {
                None | Some(LinkCommand::Close) => break LinkExit::Closed,
                // Already connected.
                Some(LinkCommand::Dial) => {},
            },
            outbound = to_remote.recv() => match outbound {
                None => break LinkExit::Closed,
                Some(envelope) => {
                    if let Err(err) = write_envelope(&mut send, &envelope).await {
                        break LinkExit::Lost(err.to_string());
                    }
                },
            },
            finished = &mut reader => {
                let reason = match finished {
                    Ok(reason) => reason,
                    Err(join_err) => format!("reader task failed: {join_err}"),
                };
                return LinkExit::Lost(reason);
            },
        }
    };

    reader.abort();
    exit
}

/// Read envelopes until the stream fails; returns the loss reason.
async fn read_loop(mut recv: RecvStream, events: mpsc::Sender<LinkEvent>) -> String {
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        match read_envelope(&mut recv, &mut buf).await {
            Ok(envelope) => {
                if events.send(LinkEvent::Envelope(envelope)).await.is_err() {
                    return "client stopped".to_string();
                }
            },
            Err(err) => return err.to_string(),
        }
    }
}

async fn read_envelope(
    recv: &mut RecvStream,
    buf: &mut BytesMut,
) -> Result<Envelope, TransportError> {
    let mut len_bytes = [0u8; 4];
    recv.read_exact(&mut len_bytes)
        .await
        .map_err(|e| TransportError::Stream(format!("length read failed: {e}")))?;
    let len = u32::from_be_bytes(len_bytes);
    if len == 0 || len > MAX_ENVELOPE_BYTES {
        return Err(TransportError::Protocol(format!("invalid envelope length {len}")));
    }

    buf.resize(len as usize, 0);
    recv.read_exact(buf)
        .await
        .map_err(|e| TransportError::Stream(format!("envelope read failed: {e}")))?;

    Envelope::decode(buf).map_err(|e| TransportError::Protocol(format!("decode failed: {e}")))
}

async fn write_envelope(send: &mut SendStream, envelope: &Envelope) -> Result<(), TransportError> {
    let payload = envelope
        .encode()
        .map_err(|e| TransportError::Protocol(format!("encode failed: {e}")))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| TransportError::Protocol("envelope too large".to_string()))?;
    if len > MAX_ENVELOPE_BYTES {
        return Err(TransportError::Protocol("envelope too large".to_string()));
    }

    let mut framed = Vec::with_capacity(4 + payload.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(&payload);
    send.write_all(&framed)
        .await
        .map_err(|e| TransportError::Stream(format!("write failed: {e}")))?;
    Ok(())
}

async fn dial(
    server_addr: SocketAddr,
    server_name: &str,
) -> Result<quinn::Connection, TransportError> {
    let bind: SocketAddr = "0.0.0.0:0"
        .parse()
        .map_err(|e| TransportError::Connection(format!("bind address: {e}")))?;
    let mut endpoint = Endpoint::client(bind)
        .map_err(|e| TransportError::Connection(format!("endpoint creation failed: {e}")))?;
    endpoint.set_default_client_config(client_config()?);

    endpoint
        .connect(server_addr, server_name)
        .map_err(|e| TransportError::Connection(format!("connect failed: {e}")))?
        .await
        .map_err(|e| TransportError::Connection(format!("connection failed: {e}")))
}

/// Client config accepting any certificate.
///
/// WARNING: Development only. Production should verify certificates.
fn client_config() -> Result<quinn::ClientConfig, TransportError> {
    let mut crypto = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InsecureCertVerifier))
        .with_no_client_auth();
    crypto.alpn_protocols = vec![ALPN.to_vec()];

    let quic = quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
        .map_err(|e| TransportError::Connection(format!("tls config: {e}")))?;
    let mut config = quinn::ClientConfig::new(Arc::new(quic));

    let mut transport = quinn::TransportConfig::default();
    let idle = quinn::IdleTimeout::try_from(IDLE_TIMEOUT)
        .map_err(|e| TransportError::Connection(format!("idle timeout: {e}")))?;
    transport.max_idle_timeout(Some(idle));
    config.transport_config(Arc::new(transport));

    Ok(config)
}

/// Certificate verifier that accepts any certificate (insecure, for
/// development).
#[derive(Debug)]
struct InsecureCertVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
