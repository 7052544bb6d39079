//! Session handshake.
//!
//! 1. The initiator sends its textual public key.
//! 2. The responder replies with its own.
//! 3. Both derive the session key from the X25519 shared secret.
//! 4. The initiator sends a random challenge sealed to the responder's key.
//! 5. The responder opens it and echoes it encrypted under the session key.
//! 6. The initiator checks the echo.
//!
//! Afterwards each side sends one encrypted [`SessionHello`] so the responder
//! learns who dialed it. Any failure yields `HandshakeFailed`; the caller
//! must drop the stream.

use std::time::Duration;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use strand_crypto::{decode_public_key, derive_session_key, NodeKeys, SessionKey};
use strand_types::{ChainTip, NodeType, PeerIdentity, PublicKey};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::codec::{read_frame_bounded, write_frame};
use crate::version::{is_compatible, PROTOCOL_VERSION};
use crate::ProtocolError;

pub const CHALLENGE_LEN: usize = 32;

/// Upper bound for any frame exchanged before the session exists.
const HANDSHAKE_FRAME_MAX: usize = 4096;

/// The outcome of a successful handshake.
#[derive(Debug)]
pub struct Session {
    pub peer_public: PublicKey,
    pub key: SessionKey,
}

/// First encrypted frame each side sends on a new session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHello {
    pub identity: PeerIdentity,
    pub node_type: NodeType,
    pub protocol_version: u16,
    pub chain_tip: Option<ChainTip>,
}

impl SessionHello {
    pub fn new(identity: PeerIdentity, node_type: NodeType, chain_tip: Option<ChainTip>) -> Self {
        Self {
            identity,
            node_type,
            protocol_version: PROTOCOL_VERSION,
            chain_tip,
        }
    }
}

fn failed(reason: impl Into<String>) -> ProtocolError {
    ProtocolError::HandshakeFailed(reason.into())
}

fn as_handshake_failure(err: ProtocolError) -> ProtocolError {
    match err {
        ProtocolError::HandshakeFailed(_) => err,
        other => failed(other.to_string()),
    }
}

async fn read_bounded<R>(
    reader: &mut R,
    timeout: Duration,
    what: &'static str,
) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    tokio::time::timeout(timeout, read_frame_bounded(reader, HANDSHAKE_FRAME_MAX))
        .await
        .map_err(|_| ProtocolError::Timeout(what))?
}

async fn read_public_key<R>(reader: &mut R, timeout: Duration) -> Result<PublicKey, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let frame = read_bounded(reader, timeout, "peer public key").await?;
    let text = std::str::from_utf8(&frame).map_err(|_| failed("public key is not UTF-8"))?;
    Ok(decode_public_key(text)?)
}

fn session_key(keys: &NodeKeys, peer: &PublicKey) -> Result<SessionKey, ProtocolError> {
    if *peer == keys.public() {
        return Err(failed("peer presented our own public key"));
    }
    let shared = keys.diffie_hellman(peer);
    Ok(derive_session_key(&shared, &keys.public(), peer))
}

/// Run the initiator side. When `expected_peer` is set the responder must
/// present exactly that key.
pub async fn initiate<R, W>(
    reader: &mut R,
    writer: &mut W,
    keys: &NodeKeys,
    expected_peer: Option<&PublicKey>,
    timeout: Duration,
) -> Result<Session, ProtocolError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    run_initiator(reader, writer, keys, expected_peer, timeout)
        .await
        .map_err(as_handshake_failure)
}

async fn run_initiator<R, W>(
    reader: &mut R,
    writer: &mut W,
    keys: &NodeKeys,
    expected_peer: Option<&PublicKey>,
    timeout: Duration,
) -> Result<Session, ProtocolError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    write_frame(writer, keys.public_text().as_bytes()).await?;
    let peer_public = read_public_key(reader, timeout).await?;
    if let Some(expected) = expected_peer {
        if *expected != peer_public {
            return Err(failed("peer presented an unexpected public key"));
        }
    }
    let key = session_key(keys, &peer_public)?;

    let mut challenge = [0u8; CHALLENGE_LEN];
    OsRng.fill_bytes(&mut challenge);
    let sealed = strand_crypto::seal(&challenge, &peer_public)?;
    write_frame(writer, &sealed).await?;

    let echo = read_bounded(reader, timeout, "challenge echo").await?;
    let echoed = strand_crypto::decrypt(&echo, &key)?;
    if echoed != challenge {
        return Err(failed("challenge echo mismatch"));
    }

    Ok(Session { peer_public, key })
}

/// Run the responder side.
pub async fn respond<R, W>(
    reader: &mut R,
    writer: &mut W,
    keys: &NodeKeys,
    timeout: Duration,
) -> Result<Session, ProtocolError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    run_responder(reader, writer, keys, timeout)
        .await
        .map_err(as_handshake_failure)
}

async fn run_responder<R, W>(
    reader: &mut R,
    writer: &mut W,
    keys: &NodeKeys,
    timeout: Duration,
) -> Result<Session, ProtocolError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let peer_public = read_public_key(reader, timeout).await?;
    write_frame(writer, keys.public_text().as_bytes()).await?;
    let key = session_key(keys, &peer_public)?;

    let sealed = read_bounded(reader, timeout, "challenge").await?;
    let challenge = strand_crypto::open(&sealed, keys)?;
    if challenge.len() != CHALLENGE_LEN {
        return Err(failed(format!("challenge has {} bytes", challenge.len())));
    }
    let echo = strand_crypto::encrypt(&challenge, &key)?;
    write_frame(writer, &echo).await?;

    Ok(Session { peer_public, key })
}

/// Send our hello under the session key.
pub async fn send_hello<W>(
    writer: &mut W,
    session: &Session,
    hello: &SessionHello,
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = bincode::serialize(hello).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    let frame = strand_crypto::encrypt(&bytes, &session.key)?;
    write_frame(writer, &frame).await
}

/// Receive the peer's hello. Its identity must carry the key the handshake
/// authenticated, and its protocol version must be supported.
pub async fn recv_hello<R>(
    reader: &mut R,
    session: &Session,
    timeout: Duration,
) -> Result<SessionHello, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let frame = read_bounded(reader, timeout, "session hello").await?;
    let bytes = strand_crypto::decrypt(&frame, &session.key)?;
    let hello: SessionHello =
        bincode::deserialize(&bytes).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    if hello.identity.public_key != session.peer_public {
        return Err(failed(format!(
            "hello from {} does not match handshake key",
            hello.identity.id
        )));
    }
    if !is_compatible(hello.protocol_version) {
        return Err(ProtocolError::UnsupportedVersion(hello.protocol_version));
    }
    tracing::debug!(
        peer = %hello.identity.id,
        node_type = %hello.node_type,
        "session hello received"
    );
    Ok(hello)
}
