// src/protocol/query.rs
use crate::errors::MonitorError;
use crate::models::server::{QueryPlayer, QueryResponse};
use crate::protocol::{normalized_name, ProtocolFamily, OOB_HEADER};
use byteorder::{LittleEndian, ReadBytesExt};
use log::trace;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

const A2S_INFO_REQUEST: &[u8] = b"TSource Engine Query\0";
const A2S_PLAYER: u8 = 0x55;
const A2S_CHALLENGE_REPLY: u8 = 0x41;
const A2S_INFO_REPLY: u8 = 0x49;
const A2S_PLAYER_REPLY: u8 = 0x44;

/// One-shot status probe bound to a single server. No retries live here; a
/// timeout or parse failure is returned as-is and retry cadence stays with
/// the caller.
pub enum QueryClient {
    Quake3(Quake3Query),
    Source(SourceQuery),
    #[cfg(test)]
    Mock(MockQuery),
}

impl std::fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryClient::Quake3(_) => f.write_str("QueryClient::Quake3"),
            QueryClient::Source(_) => f.write_str("QueryClient::Source"),
            #[cfg(test)]
            QueryClient::Mock(_) => f.write_str("QueryClient::Mock"),
        }
    }
}

impl QueryClient {
    pub async fn get_server_status(&self) -> Result<QueryResponse, MonitorError> {
        match self {
            QueryClient::Quake3(client) => client.get_server_status().await,
            QueryClient::Source(client) => client.get_server_status().await,
            #[cfg(test)]
            QueryClient::Mock(client) => (client.handler)(),
        }
    }
}

#[cfg(test)]
pub struct MockQuery {
    pub handler: Box<dyn Fn() -> Result<QueryResponse, MonitorError> + Send + Sync>,
}

async fn bind_probe_socket(addr: &str) -> Result<UdpSocket, MonitorError> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(MonitorError::QuerySocketError)?;
    socket
        .connect(addr)
        .await
        .map_err(MonitorError::QuerySocketError)?;
    Ok(socket)
}

async fn exchange(
    socket: &UdpSocket,
    addr: &str,
    request: &[u8],
    wait: Duration,
) -> Result<Vec<u8>, MonitorError> {
    socket
        .send(request)
        .await
        .map_err(MonitorError::QuerySocketError)?;

    let mut buf = vec![0u8; 8192];
    match timeout(wait, socket.recv(&mut buf)).await {
        Ok(Ok(len)) => {
            buf.truncate(len);
            Ok(buf)
        }
        Ok(Err(e)) => Err(MonitorError::QuerySocketError(e)),
        Err(_) => Err(MonitorError::QueryTimeout(addr.to_string())),
    }
}

fn strip_oob(payload: &[u8]) -> Result<&[u8], MonitorError> {
    match payload.strip_prefix(&OOB_HEADER[..]) {
        Some(rest) => Ok(rest),
        None => Err(MonitorError::QueryProtocolError(
            "response missing out-of-band header".to_string(),
        )),
    }
}

// ---------------------------------------------------------------------------
// Quake3 family
// ---------------------------------------------------------------------------

pub struct Quake3Query {
    addr: String,
    timeout: Duration,
}

impl Quake3Query {
    pub fn new(addr: String, timeout: Duration) -> Self {
        Self { addr, timeout }
    }

    pub async fn get_server_status(&self) -> Result<QueryResponse, MonitorError> {
        let socket = bind_probe_socket(&self.addr).await?;
        let request = [&OOB_HEADER[..], b"getstatus\n"].concat();
        trace!("sending getstatus to {}", self.addr);
        let payload = exchange(&socket, &self.addr, &request, self.timeout).await?;
        parse_quake3_status(&payload)
    }
}

fn parse_quake3_status(payload: &[u8]) -> Result<QueryResponse, MonitorError> {
    let body = strip_oob(payload)?;
    let text = String::from_utf8_lossy(body);
    let mut lines = text.lines();

    match lines.next() {
        Some(first) if first.trim() == "statusResponse" => {}
        _ => {
            return Err(MonitorError::QueryProtocolError(
                "expected statusResponse".to_string(),
            ))
        }
    }

    let params_line = lines.next().ok_or_else(|| {
        MonitorError::QueryProtocolError("status response missing cvar line".to_string())
    })?;
    let server_params = parse_info_string(params_line);

    let mut players = Vec::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        players.push(parse_quake3_player(line)?);
    }

    let game_mod = server_params
        .get("fs_game")
        .filter(|v| !v.is_empty())
        .or_else(|| server_params.get("gamename"))
        .cloned()
        .unwrap_or_default();

    Ok(QueryResponse {
        server_name: server_params.get("sv_hostname").cloned().unwrap_or_default(),
        map: server_params.get("mapname").cloned().unwrap_or_default(),
        game_mod,
        max_players: server_params
            .get("sv_maxclients")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        player_count: players.len() as i32,
        server_params,
        players,
    })
}

/// `\key\value\key\value...` cvar line. A trailing key without a value is
/// dropped.
fn parse_info_string(line: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut parts = line.trim_start_matches('\\').split('\\');
    while let (Some(key), Some(value)) = (parts.next(), parts.next()) {
        params.insert(key.to_string(), value.to_string());
    }
    params
}

/// `<score> <ping> "<name>"`, one line per player.
fn parse_quake3_player(line: &str) -> Result<QueryPlayer, MonitorError> {
    let mut parts = line.trim().splitn(3, ' ');
    let score = parts
        .next()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| MonitorError::QueryProtocolError(format!("bad player line: {line}")))?;
    let ping = parts
        .next()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| MonitorError::QueryProtocolError(format!("bad player line: {line}")))?;
    let name = parts
        .next()
        .map(|v| v.trim().trim_matches('"').to_string())
        .ok_or_else(|| MonitorError::QueryProtocolError(format!("bad player line: {line}")))?;

    Ok(QueryPlayer {
        normalized_name: normalized_name(ProtocolFamily::Quake3, &name),
        name,
        score,
        ping: Some(ping),
        duration_secs: None,
    })
}

// ---------------------------------------------------------------------------
// Source family
// ---------------------------------------------------------------------------

pub struct SourceQuery {
    addr: String,
    timeout: Duration,
}

impl SourceQuery {
    pub fn new(addr: String, timeout: Duration) -> Self {
        Self { addr, timeout }
    }

    pub async fn get_server_status(&self) -> Result<QueryResponse, MonitorError> {
        // The challenge is tied to our source port, so both exchanges must
        // share one socket.
        let socket = bind_probe_socket(&self.addr).await?;

        let info_request = [&OOB_HEADER[..], A2S_INFO_REQUEST].concat();
        let info_body = self
            .challenged_exchange(&socket, &info_request, &[], A2S_INFO_REPLY)
            .await?;
        let info = parse_a2s_info(&info_body)?;

        let player_request = [&OOB_HEADER[..], &[A2S_PLAYER]].concat();
        let player_body = self
            .challenged_exchange(&socket, &player_request, &[0xFF; 4], A2S_PLAYER_REPLY)
            .await?;
        let players = parse_a2s_players(&player_body)?;

        Ok(QueryResponse {
            server_name: info.name,
            map: info.map,
            game_mod: info.folder,
            max_players: info.max_players,
            player_count: players.len() as i32,
            server_params: info.params,
            players,
        })
    }

    /// Sends `base + challenge`, honoring up to two `0x41` challenge replies
    /// before expecting the real response header.
    async fn challenged_exchange(
        &self,
        socket: &UdpSocket,
        base: &[u8],
        initial_challenge: &[u8],
        expected: u8,
    ) -> Result<Vec<u8>, MonitorError> {
        let mut request = [base, initial_challenge].concat();
        for _ in 0..3 {
            let payload = exchange(socket, &self.addr, &request, self.timeout).await?;
            let body = strip_oob(&payload)?;
            match body.first() {
                Some(&A2S_CHALLENGE_REPLY) => {
                    let challenge = body.get(1..5).ok_or_else(|| {
                        MonitorError::QueryProtocolError("short challenge reply".to_string())
                    })?;
                    trace!("got a2s challenge from {}", self.addr);
                    request = [base, challenge].concat();
                }
                Some(header) if *header == expected => return Ok(body[1..].to_vec()),
                _ => {
                    return Err(MonitorError::QueryProtocolError(format!(
                        "unexpected a2s header, wanted {expected:#x}"
                    )))
                }
            }
        }
        Err(MonitorError::QueryProtocolError(
            "server kept issuing challenges".to_string(),
        ))
    }
}

#[derive(Debug)]
struct A2sInfo {
    name: String,
    map: String,
    folder: String,
    max_players: i32,
    params: HashMap<String, String>,
}

fn parse_a2s_info(body: &[u8]) -> Result<A2sInfo, MonitorError> {
    let mut cursor = Cursor::new(body);
    let protocol = read_u8(&mut cursor)?;
    let name = read_cstring(&mut cursor)?;
    let map = read_cstring(&mut cursor)?;
    let folder = read_cstring(&mut cursor)?;
    let game = read_cstring(&mut cursor)?;
    let app_id = cursor
        .read_u16::<LittleEndian>()
        .map_err(|_| truncated("a2s info"))?;
    let players = read_u8(&mut cursor)?;
    let max_players = read_u8(&mut cursor)?;
    let bots = read_u8(&mut cursor)?;
    let server_type = read_u8(&mut cursor)?;
    let environment = read_u8(&mut cursor)?;
    let visibility = read_u8(&mut cursor)?;
    let vac = read_u8(&mut cursor)?;

    let mut params = HashMap::new();
    params.insert("protocol".to_string(), protocol.to_string());
    params.insert("game".to_string(), game);
    params.insert("folder".to_string(), folder.clone());
    params.insert("appid".to_string(), app_id.to_string());
    params.insert("players".to_string(), players.to_string());
    params.insert("bots".to_string(), bots.to_string());
    params.insert("server_type".to_string(), (server_type as char).to_string());
    params.insert("environment".to_string(), (environment as char).to_string());
    params.insert("visibility".to_string(), visibility.to_string());
    params.insert("vac".to_string(), vac.to_string());
    // Version trails on most servers but is absent on very old ones.
    if let Ok(version) = read_cstring(&mut cursor) {
        params.insert("version".to_string(), version);
    }

    Ok(A2sInfo {
        name,
        map,
        folder,
        max_players: max_players as i32,
        params,
    })
}

fn parse_a2s_players(body: &[u8]) -> Result<Vec<QueryPlayer>, MonitorError> {
    let mut cursor = Cursor::new(body);
    let count = read_u8(&mut cursor)?;
    let mut players = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let _index = read_u8(&mut cursor)?;
        let name = read_cstring(&mut cursor)?;
        let score = cursor
            .read_i32::<LittleEndian>()
            .map_err(|_| truncated("a2s player"))?;
        let duration = cursor
            .read_f32::<LittleEndian>()
            .map_err(|_| truncated("a2s player"))?;
        players.push(QueryPlayer {
            normalized_name: normalized_name(ProtocolFamily::Source, &name),
            name,
            score,
            ping: None,
            duration_secs: Some(duration),
        });
    }
    Ok(players)
}

fn read_u8(cursor: &mut Cursor<&[u8]>) -> Result<u8, MonitorError> {
    cursor.read_u8().map_err(|_| truncated("a2s response"))
}

fn read_cstring(cursor: &mut Cursor<&[u8]>) -> Result<String, MonitorError> {
    let mut bytes = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        cursor
            .read_exact(&mut byte)
            .map_err(|_| truncated("a2s string"))?;
        if byte[0] == 0 {
            return Ok(String::from_utf8_lossy(&bytes).into_owned());
        }
        bytes.push(byte[0]);
    }
}

fn truncated(what: &str) -> MonitorError {
    MonitorError::QueryProtocolError(format!("truncated {what}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const Q3_STATUS: &[u8] = b"\xFF\xFF\xFF\xFFstatusResponse\n\
        \\sv_hostname\\Test Server\\mapname\\q3dm17\\fs_game\\osp\\sv_maxclients\\16\n\
        5 40 \"^1Foo\"\n\
        12 80 \"Bar Baz\"\n";

    #[test]
    fn quake3_status_parses_params_and_players() {
        let response = parse_quake3_status(Q3_STATUS).unwrap();
        assert_eq!(response.server_name, "Test Server");
        assert_eq!(response.map, "q3dm17");
        assert_eq!(response.game_mod, "osp");
        assert_eq!(response.max_players, 16);
        assert_eq!(response.player_count, 2);
        assert_eq!(response.players[0].name, "^1Foo");
        assert_eq!(response.players[0].normalized_name, "FOO");
        assert_eq!(response.players[0].score, 5);
        assert_eq!(response.players[0].ping, Some(40));
        assert_eq!(response.players[1].normalized_name, "BAR BAZ");
        assert_eq!(response.server_params.get("fs_game").unwrap(), "osp");
    }

    #[test]
    fn quake3_status_without_players_is_empty() {
        let payload = b"\xFF\xFF\xFF\xFFstatusResponse\n\\mapname\\q3dm6\\sv_maxclients\\8\n";
        let response = parse_quake3_status(payload).unwrap();
        assert_eq!(response.player_count, 0);
        assert!(response.players.is_empty());
    }

    #[test]
    fn garbage_payload_is_a_protocol_error() {
        let err = parse_quake3_status(b"\xFF\xFF\xFF\xFFprint\nnope").unwrap_err();
        assert!(matches!(err, MonitorError::QueryProtocolError(_)));

        let err = parse_quake3_status(b"no header at all").unwrap_err();
        assert!(matches!(err, MonitorError::QueryProtocolError(_)));
    }

    fn a2s_info_fixture() -> Vec<u8> {
        let mut body = vec![0x11];
        body.extend_from_slice(b"Test Source\0");
        body.extend_from_slice(b"de_dust2\0");
        body.extend_from_slice(b"cstrike\0");
        body.extend_from_slice(b"Counter-Strike: Source\0");
        body.extend_from_slice(&240u16.to_le_bytes());
        body.extend_from_slice(&[2, 24, 0, b'd', b'l', 0, 1]);
        body.extend_from_slice(b"1.0.0.70\0");
        body
    }

    #[test]
    fn a2s_info_parses_metadata() {
        let info = parse_a2s_info(&a2s_info_fixture()).unwrap();
        assert_eq!(info.name, "Test Source");
        assert_eq!(info.map, "de_dust2");
        assert_eq!(info.folder, "cstrike");
        assert_eq!(info.max_players, 24);
        assert_eq!(info.params.get("appid").unwrap(), "240");
        assert_eq!(info.params.get("version").unwrap(), "1.0.0.70");
    }

    #[test]
    fn a2s_info_truncation_is_a_protocol_error() {
        let body = a2s_info_fixture();
        let err = parse_a2s_info(&body[..10]).unwrap_err();
        assert!(matches!(err, MonitorError::QueryProtocolError(_)));
    }

    #[test]
    fn a2s_players_parse_score_and_duration() {
        let mut body = vec![2u8];
        body.push(0);
        body.extend_from_slice(b"Foo\0");
        body.extend_from_slice(&5i32.to_le_bytes());
        body.extend_from_slice(&120.5f32.to_le_bytes());
        body.push(1);
        body.extend_from_slice(b"bar\0");
        body.extend_from_slice(&(-1i32).to_le_bytes());
        body.extend_from_slice(&3.25f32.to_le_bytes());

        let players = parse_a2s_players(&body).unwrap();
        assert_eq!(players.len(), 2);
        assert_eq!(players[0].normalized_name, "FOO");
        assert_eq!(players[0].score, 5);
        assert_eq!(players[0].duration_secs, Some(120.5));
        assert_eq!(players[0].ping, None);
        assert_eq!(players[1].score, -1);
    }

    #[tokio::test]
    async fn quake3_probe_round_trips_over_loopback() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (len, peer) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..len], [&OOB_HEADER[..], b"getstatus\n"].concat());
            server.send_to(Q3_STATUS, peer).await.unwrap();
        });

        let client = Quake3Query::new(addr.to_string(), Duration::from_millis(500));
        let response = client.get_server_status().await.unwrap();
        assert_eq!(response.map, "q3dm17");
        assert_eq!(response.player_count, 2);
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        let client = Quake3Query::new(addr.to_string(), Duration::from_millis(50));
        let err = client.get_server_status().await.unwrap_err();
        assert!(matches!(err, MonitorError::QueryTimeout(_)));
    }

    #[tokio::test]
    async fn source_probe_handles_player_challenge() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];

            // A2S_INFO, answered directly.
            let (len, peer) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..len], [&OOB_HEADER[..], A2S_INFO_REQUEST].concat());
            let mut reply = OOB_HEADER.to_vec();
            reply.push(A2S_INFO_REPLY);
            reply.extend_from_slice(&a2s_info_fixture());
            server.send_to(&reply, peer).await.unwrap();

            // A2S_PLAYER with the placeholder challenge gets a real one.
            let (len, peer) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..len], [&OOB_HEADER[..], &[A2S_PLAYER], &[0xFF; 4][..]].concat());
            let mut reply = OOB_HEADER.to_vec();
            reply.push(A2S_CHALLENGE_REPLY);
            reply.extend_from_slice(&[9, 8, 7, 6]);
            server.send_to(&reply, peer).await.unwrap();

            // Challenged retry gets the player list.
            let (len, peer) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..len], [&OOB_HEADER[..], &[A2S_PLAYER], &[9, 8, 7, 6][..]].concat());
            let mut reply = OOB_HEADER.to_vec();
            reply.push(A2S_PLAYER_REPLY);
            reply.push(1);
            reply.push(0);
            reply.extend_from_slice(b"Foo\0");
            reply.extend_from_slice(&7i32.to_le_bytes());
            reply.extend_from_slice(&60.0f32.to_le_bytes());
            server.send_to(&reply, peer).await.unwrap();
        });

        let client = SourceQuery::new(addr.to_string(), Duration::from_millis(500));
        let response = client.get_server_status().await.unwrap();
        assert_eq!(response.server_name, "Test Source");
        assert_eq!(response.game_mod, "cstrike");
        assert_eq!(response.player_count, 1);
        assert_eq!(response.players[0].score, 7);
        assert_eq!(response.players[0].duration_secs, Some(60.0));
    }
}
