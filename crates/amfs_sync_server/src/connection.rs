//! Per-connection protocol state machine (§4.7): reads one line at a time,
//! optionally followed by a declared-length binary payload, and drives a
//! per-node table of [`SyncSession`]s against the shared [`Engine`].

use std::collections::HashMap;
use std::sync::Arc;

use amfs_core::mergeable::{MergeableDoc, SyncSession};
use amfs_core::metadata::NodeKind;
use amfs_core::{AmfsError, Engine, NodeId};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};

/// Payloads larger than this are rejected without being read into memory
/// past the declared length check (§4.7: "Payload size is bounded (<= 1
/// MiB); reject oversize").
const MAX_PAYLOAD: usize = 1024 * 1024;

/// Drive the protocol for one connection until the peer disconnects or a
/// framing error occurs. Per-command errors (a bad `OPEN`/`SYNC`) are
/// reported inline and do not end the connection (§4.7).
pub async fn handle<S>(stream: S, engine: Arc<Engine>) -> std::io::Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut sessions: HashMap<NodeId, SyncSession> = HashMap::new();

    loop {
        let mut line = Vec::new();
        let n = reader.read_until(b'\n', &mut line).await?;
        if n == 0 {
            log::debug!("connection closed by peer");
            return Ok(());
        }
        while line.last() == Some(&b'\n') || line.last() == Some(&b'\r') {
            line.pop();
        }
        let line = match String::from_utf8(line) {
            Ok(line) => line,
            Err(_) => {
                log::warn!("non-UTF-8 line, closing connection");
                return Ok(());
            }
        };
        if line.is_empty() {
            continue;
        }

        match dispatch(&line, &mut reader, &engine, &mut sessions).await {
            Ok(response) => writer.write_all(&response).await?,
            Err(Frame::Transport(err)) => return Err(err),
            Err(Frame::Protocol(reason)) => {
                let response = format!("ERROR {line}:{reason}\n");
                writer.write_all(response.as_bytes()).await?;
            }
        }
        writer.flush().await?;
    }
}

enum Frame {
    /// The framing itself broke (a read failed mid-payload); the
    /// connection must close.
    Transport(std::io::Error),
    /// The command was well-framed but semantically invalid; reported
    /// inline, connection stays open.
    Protocol(String),
}

async fn dispatch(
    line: &str,
    reader: &mut (impl tokio::io::AsyncBufRead + Unpin),
    engine: &Engine,
    sessions: &mut HashMap<NodeId, SyncSession>,
) -> Result<Vec<u8>, Frame> {
    let mut parts = line.splitn(2, ' ');
    let command = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or_default();

    match command {
        "PING" => Ok(format!("PONG {rest}\n").into_bytes()),

        "OPEN" => {
            let path = rest.trim();
            match open_or_reuse(engine, sessions, path) {
                Ok(id) => {
                    let bytes = sessions.get(&id).expect("just inserted").document().to_bytes();
                    Ok(frame_response("OPENED", &id, &bytes))
                }
                Err(reason) => Err(Frame::Protocol(reason)),
            }
        }

        "CLOSE" => {
            let id = NodeId::from_str_unchecked(rest.trim().to_string());
            sessions.remove(&id);
            Ok(format!("CLOSED {id}\n").into_bytes())
        }

        "SYNC" => {
            let mut tokens = rest.trim().splitn(2, ' ');
            let id_text = tokens.next().unwrap_or_default();
            let len_text = tokens.next().unwrap_or_default();
            let id = NodeId::from_str_unchecked(id_text.to_string());

            let len: usize = match len_text.trim().parse() {
                Ok(len) => len,
                Err(_) => return Err(Frame::Protocol("malformed payload length".to_string())),
            };
            if len > MAX_PAYLOAD {
                return Err(Frame::Protocol(format!("payload too large: {len} bytes")));
            }

            let mut payload = vec![0u8; len];
            reader.read_exact(&mut payload).await.map_err(Frame::Transport)?;
            let mut nl = [0u8; 1];
            reader.read_exact(&mut nl).await.map_err(Frame::Transport)?;

            let Some(session) = sessions.get_mut(&id) else {
                return Err(Frame::Protocol("no open session for node".to_string()));
            };

            if !payload.is_empty() {
                if let Err(err) = session.receive(&payload) {
                    return Err(Frame::Protocol(err.to_string()));
                }

                let text = session.document().content();
                let head = session.document().head_hash();
                if let Err(err) = engine.mergeables().save(&id, session.document()) {
                    return Err(Frame::Protocol(err.to_string()));
                }
                if let Err(err) = engine.commit_sync_promote(&id, text.len() as u64, head) {
                    return Err(Frame::Protocol(err.to_string()));
                }
                log::debug!("merged sync payload for {id} ({} bytes of text)", text.len());
            }

            let outbound = session.generate();
            Ok(frame_response("SYNC", &id, &outbound))
        }

        other => Err(Frame::Protocol(format!("unknown command {other:?}"))),
    }
}

/// Resolve `path` and reuse or create the session for its node (§4.7 OPEN
/// semantics), returning the node id on success.
fn open_or_reuse(
    engine: &Engine,
    sessions: &mut HashMap<NodeId, SyncSession>,
    path: &str,
) -> Result<NodeId, String> {
    let (id, record) = engine.resolve_for_sync(path).map_err(format_err)?;

    if !sessions.contains_key(&id) {
        let document = match record.kind {
            NodeKind::Mergeable => engine.mergeables().load(&id).map_err(format_err)?,
            NodeKind::Blob => {
                let bytes = match record.heads.first() {
                    Some(digest) => engine.blobs().get(digest).map_err(format_err)?,
                    None => Vec::new(),
                };
                let text = String::from_utf8_lossy(&bytes).into_owned();
                MergeableDoc::new_with_text(&text)
            }
            NodeKind::Folder => unreachable!("resolve_for_sync rejects folders"),
        };
        sessions.insert(id.clone(), SyncSession::new(document));
    }

    Ok(id)
}

fn format_err(err: AmfsError) -> String {
    err.to_string()
}

fn frame_response(verb: &str, id: &NodeId, payload: &[u8]) -> Vec<u8> {
    let mut out = format!("{verb} {id} {}\n", payload.len()).into_bytes();
    out.extend_from_slice(payload);
    out.push(b'\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use amfs_core::config::Config;
    use amfs_core::MountableFilesystem;
    use tokio::io::AsyncWriteExt as _;

    fn engine_in(dir: &std::path::Path) -> Engine {
        let config = Config {
            data_dir: dir.join("data"),
            scratch_dir: dir.join("scratch"),
            sync_listen: "127.0.0.1:0".to_string(),
            sync_unix_socket: None,
            log_level: "off".to_string(),
        };
        Engine::open(&config).unwrap()
    }

    #[tokio::test]
    async fn ping_pong_round_trips_the_tail() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(engine_in(dir.path()));

        let (client, server) = tokio::io::duplex(4096);
        let task = tokio::spawn(handle(server, engine));

        let (mut read_half, mut write_half) = tokio::io::split(client);
        write_half.write_all(b"PING hi\n").await.unwrap();

        let mut reader = BufReader::new(&mut read_half);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "PONG hi\n");

        drop(write_half);
        let _ = task.await;
    }

    #[tokio::test]
    async fn open_then_sync_merges_and_promotes_to_mergeable() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(engine_in(dir.path()));

        let handle_bytes = engine.create("m").unwrap();
        engine.write(&handle_bytes, b"hello", 0).unwrap();
        engine.close_handle(handle_bytes).unwrap();

        let (client, server) = tokio::io::duplex(1 << 20);
        let task = tokio::spawn(handle(server, engine.clone()));

        let (read_half, mut write_half) = tokio::io::split(client);
        let mut reader = BufReader::new(read_half);

        write_half.write_all(b"OPEN m\n").await.unwrap();
        let mut header = String::new();
        reader.read_line(&mut header).await.unwrap();
        assert!(header.starts_with("OPENED "));
        let len: usize = header.trim().rsplit(' ').next().unwrap().parse().unwrap();
        let mut doc_bytes = vec![0u8; len];
        reader.read_exact(&mut doc_bytes).await.unwrap();
        let mut nl = [0u8; 1];
        reader.read_exact(&mut nl).await.unwrap();

        // Build an independent peer document from the same bytes, append
        // " world" locally, and generate a SYNC payload to send back.
        let remote = MergeableDoc::from_bytes(&doc_bytes).unwrap();
        remote.insert_text(5, " world");
        let mut remote_session = SyncSession::new(remote);
        let outbound = remote_session.generate();

        let sync_line = format!("SYNC m {}\n", outbound.len());
        write_half.write_all(sync_line.as_bytes()).await.unwrap();
        write_half.write_all(&outbound).await.unwrap();
        write_half.write_all(b"\n").await.unwrap();

        let mut sync_header = String::new();
        reader.read_line(&mut sync_header).await.unwrap();
        assert!(sync_header.starts_with("SYNC m "));

        drop(write_half);
        let _ = task.await;

        let handle_bytes = engine.open("m").unwrap();
        let mut buf = [0u8; 11];
        engine.read(&handle_bytes, &mut buf, 0).unwrap();
        engine.close_handle(handle_bytes).unwrap();
        assert_eq!(&buf, b"hello world");
        assert!(engine.stat("m").unwrap().size >= 11);
    }
}
