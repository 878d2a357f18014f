// src/protocol/rcon.rs
use crate::errors::MonitorError;
use crate::models::server::RconPlayer;
use crate::protocol::packet::{
    RconPacket, SERVERDATA_AUTH, SERVERDATA_AUTH_RESPONSE, SERVERDATA_EXECCOMMAND,
};
use crate::protocol::{normalized_name, ProtocolFamily, OOB_HEADER};
use log::{debug, trace, warn};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::{sleep, timeout};

/// Window for collecting follow-up datagrams once the first response to a
/// connectionless command has arrived.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// Authenticated control channel bound to a single server.
///
/// Transient connection failures are retried along the configured backoff
/// list; an authentication rejection aborts immediately and is never retried
/// with the same credential.
pub enum RconClient {
    Quake3(Quake3Rcon),
    Source(SourceRcon),
    #[cfg(test)]
    Mock(MockRcon),
}

impl std::fmt::Debug for RconClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RconClient::Quake3(_) => f.write_str("RconClient::Quake3"),
            RconClient::Source(_) => f.write_str("RconClient::Source"),
            #[cfg(test)]
            RconClient::Mock(_) => f.write_str("RconClient::Mock"),
        }
    }
}

impl RconClient {
    pub async fn get_players(&mut self) -> Result<Vec<RconPlayer>, MonitorError> {
        match self {
            RconClient::Quake3(client) => {
                let output = client.execute("status").await?;
                Ok(parse_quake3_players(&output))
            }
            RconClient::Source(client) => {
                let output = client.execute("status").await?;
                Ok(parse_source_players(&output))
            }
            #[cfg(test)]
            RconClient::Mock(client) => {
                client
                    .calls
                    .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                (client.handler)()
            }
        }
    }

    pub async fn say(&mut self, message: &str) -> Result<(), MonitorError> {
        match self {
            RconClient::Quake3(client) => client.execute(&format!("say \"{message}\"")).await,
            RconClient::Source(client) => client.execute(&format!("say {message}")).await,
            #[cfg(test)]
            RconClient::Mock(_) => Ok(String::new()),
        }
        .map(drop)
    }

    pub async fn kick(&mut self, player_num: i32) -> Result<(), MonitorError> {
        match self {
            RconClient::Quake3(client) => client.execute(&format!("clientkick {player_num}")).await,
            RconClient::Source(client) => client.execute(&format!("kickid {player_num}")).await,
            #[cfg(test)]
            RconClient::Mock(_) => Ok(String::new()),
        }
        .map(drop)
    }

    pub async fn change_map(&mut self, map: &str) -> Result<(), MonitorError> {
        match self {
            RconClient::Quake3(client) => client.execute(&format!("map {map}")).await,
            RconClient::Source(client) => client.execute(&format!("changelevel {map}")).await,
            #[cfg(test)]
            RconClient::Mock(_) => Ok(String::new()),
        }
        .map(drop)
    }

    /// Restart the current round without touching the map.
    pub async fn restart(&mut self) -> Result<(), MonitorError> {
        match self {
            RconClient::Quake3(client) => client.execute("fast_restart").await,
            RconClient::Source(client) => client.execute("mp_restartgame 1").await,
            #[cfg(test)]
            RconClient::Mock(_) => Ok(String::new()),
        }
        .map(drop)
    }

    /// Restart the current map.
    pub async fn restart_map(&mut self) -> Result<(), MonitorError> {
        match self {
            RconClient::Quake3(client) => client.execute("map_restart").await,
            RconClient::Source(client) => client.execute("mp_restartgame 3").await,
            #[cfg(test)]
            RconClient::Mock(_) => Ok(String::new()),
        }
        .map(drop)
    }

    /// Advance to the next map in the server's rotation.
    pub async fn next_map(&mut self) -> Result<(), MonitorError> {
        match self {
            RconClient::Quake3(client) => client.execute("map_rotate").await,
            RconClient::Source(client) => client.execute("changelevel_next").await,
            #[cfg(test)]
            RconClient::Mock(_) => Ok(String::new()),
        }
        .map(drop)
    }

    /// Raw rotation listing as the server prints it.
    pub async fn map_rotation(&mut self) -> Result<String, MonitorError> {
        match self {
            RconClient::Quake3(client) => client.execute("sv_mapRotation").await,
            RconClient::Source(client) => client.execute("mapcyclefile").await,
            #[cfg(test)]
            RconClient::Mock(_) => Ok(String::new()),
        }
    }
}

#[cfg(test)]
pub struct MockRcon {
    pub calls: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    pub handler: Box<dyn Fn() -> Result<Vec<RconPlayer>, MonitorError> + Send + Sync>,
}

fn timeout_error(message: &str) -> MonitorError {
    MonitorError::RconConnectionError(io::Error::new(io::ErrorKind::TimedOut, message.to_string()))
}

// ---------------------------------------------------------------------------
// Quake3 family: connectionless UDP, password on every datagram
// ---------------------------------------------------------------------------

pub struct Quake3Rcon {
    addr: String,
    password: String,
    timeout: Duration,
    retry_delays: Vec<Duration>,
}

impl Quake3Rcon {
    pub fn new(addr: String, password: String, timeout: Duration, retry_delays: Vec<Duration>) -> Self {
        Self {
            addr,
            password,
            timeout,
            retry_delays,
        }
    }

    pub async fn execute(&mut self, command: &str) -> Result<String, MonitorError> {
        let mut attempt = 0;
        loop {
            match self.execute_once(command).await {
                Err(MonitorError::RconConnectionError(e)) => {
                    if attempt >= self.retry_delays.len() {
                        warn!("rcon to {} exhausted {} attempts: {}", self.addr, attempt + 1, e);
                        return Err(MonitorError::RconUnavailable(attempt + 1));
                    }
                    debug!("rcon attempt {} to {} failed: {}", attempt + 1, self.addr, e);
                    sleep(self.retry_delays[attempt]).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn execute_once(&self, command: &str) -> Result<String, MonitorError> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(MonitorError::RconConnectionError)?;
        socket
            .connect(&self.addr)
            .await
            .map_err(MonitorError::RconConnectionError)?;

        let line = format!("rcon {} {}", self.password, command);
        let request = [&OOB_HEADER[..], line.as_bytes()].concat();
        trace!("sending connectionless rcon command to {}", self.addr);
        socket
            .send(&request)
            .await
            .map_err(MonitorError::RconConnectionError)?;

        // The reply can span several datagrams with no length marker, so the
        // first one gets the full timeout and the rest a short drain window.
        let mut output = String::new();
        let mut buf = vec![0u8; 16384];
        let mut wait = self.timeout;
        loop {
            match timeout(wait, socket.recv(&mut buf)).await {
                Ok(Ok(len)) => {
                    output.push_str(&parse_print_payload(&buf[..len])?);
                    wait = DRAIN_TIMEOUT;
                }
                Ok(Err(e)) => return Err(MonitorError::RconConnectionError(e)),
                Err(_) if output.is_empty() => {
                    return Err(timeout_error("no response to rcon command"))
                }
                Err(_) => break,
            }
        }

        if is_bad_password(&output) {
            return Err(MonitorError::RconAuthenticationFailed);
        }
        Ok(output)
    }
}

fn parse_print_payload(payload: &[u8]) -> Result<String, MonitorError> {
    let body = payload
        .strip_prefix(&OOB_HEADER[..])
        .ok_or(MonitorError::MalformedPacket("missing out-of-band header"))?;
    let text = String::from_utf8_lossy(body);
    Ok(text
        .strip_prefix("print\n")
        .or_else(|| text.strip_prefix("print"))
        .unwrap_or(&text)
        .to_string())
}

fn is_bad_password(output: &str) -> bool {
    let lowered = output.to_lowercase();
    lowered.contains("bad rcon") || lowered.contains("invalid password") || lowered.contains("bad password")
}

// ---------------------------------------------------------------------------
// Source family: persistent TCP with an authentication handshake
// ---------------------------------------------------------------------------

pub struct SourceRcon {
    addr: String,
    password: String,
    timeout: Duration,
    retry_delays: Vec<Duration>,
    stream: Option<TcpStream>,
    next_request_id: i32,
}

impl SourceRcon {
    pub fn new(addr: String, password: String, timeout: Duration, retry_delays: Vec<Duration>) -> Self {
        Self {
            addr,
            password,
            timeout,
            retry_delays,
            stream: None,
            next_request_id: 0,
        }
    }

    fn next_id(&mut self) -> i32 {
        self.next_request_id += 1;
        self.next_request_id
    }

    pub async fn execute(&mut self, command: &str) -> Result<String, MonitorError> {
        let mut attempt = 0;
        loop {
            match self.execute_once(command).await {
                Err(MonitorError::RconConnectionError(e)) => {
                    if attempt >= self.retry_delays.len() {
                        warn!("rcon to {} exhausted {} attempts: {}", self.addr, attempt + 1, e);
                        return Err(MonitorError::RconUnavailable(attempt + 1));
                    }
                    debug!("rcon attempt {} to {} failed: {}", attempt + 1, self.addr, e);
                    sleep(self.retry_delays[attempt]).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// One command over the persistent connection. Any failure tears the
    /// connection down so the next attempt reconnects and re-authenticates
    /// before sending anything else.
    async fn execute_once(&mut self, command: &str) -> Result<String, MonitorError> {
        let result = self.exchange(command).await;
        if result.is_err() {
            self.stream = None;
        }
        result
    }

    async fn exchange(&mut self, command: &str) -> Result<String, MonitorError> {
        if self.stream.is_none() {
            let stream = self.connect_and_auth().await?;
            self.stream = Some(stream);
        }

        let command_id = self.next_id();
        let tracking_id = self.next_id();
        let wait = self.timeout;
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return Err(timeout_error("rcon connection missing")),
        };

        // The server does not announce how many packets a response spans, so
        // an empty trailing command marks the end: once its echo arrives,
        // everything for the real command has been received.
        write_packet(stream, &RconPacket::new(command_id, SERVERDATA_EXECCOMMAND, command), wait)
            .await?;
        write_packet(stream, &RconPacket::new(tracking_id, SERVERDATA_EXECCOMMAND, ""), wait)
            .await?;

        let mut output = String::new();
        loop {
            let packet = read_packet(stream, wait).await?;
            if packet.request_id == tracking_id {
                break;
            }
            output.push_str(&packet.body1);
        }
        Ok(output)
    }

    async fn connect_and_auth(&mut self) -> Result<TcpStream, MonitorError> {
        let mut stream = match timeout(self.timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(MonitorError::RconConnectionError(e)),
            Err(_) => return Err(timeout_error("rcon connect timed out")),
        };
        trace!("opened rcon stream to {}, authenticating", self.addr);

        let auth_id = self.next_id();
        let auth = RconPacket::new(auth_id, SERVERDATA_AUTH, &self.password);
        write_packet(&mut stream, &auth, self.timeout).await?;

        // An empty response-value packet may precede the auth response.
        loop {
            let packet = read_packet(&mut stream, self.timeout).await?;
            if packet.packet_type != SERVERDATA_AUTH_RESPONSE {
                continue;
            }
            if packet.request_id == -1 {
                return Err(MonitorError::RconAuthenticationFailed);
            }
            if packet.request_id != auth_id {
                return Err(MonitorError::MalformedPacket("auth response id mismatch"));
            }
            debug!("authenticated rcon session with {}", self.addr);
            return Ok(stream);
        }
    }
}

async fn write_packet(
    stream: &mut TcpStream,
    packet: &RconPacket,
    wait: Duration,
) -> Result<(), MonitorError> {
    match timeout(wait, stream.write_all(&packet.encode())).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(MonitorError::RconConnectionError(e)),
        Err(_) => Err(timeout_error("rcon write timed out")),
    }
}

async fn read_packet(stream: &mut TcpStream, wait: Duration) -> Result<RconPacket, MonitorError> {
    let mut size_buf = [0u8; 4];
    match timeout(wait, stream.read_exact(&mut size_buf)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => return Err(MonitorError::RconConnectionError(e)),
        Err(_) => return Err(timeout_error("rcon read timed out")),
    }

    let size = i32::from_le_bytes(size_buf);
    if !(10..=1 << 20).contains(&size) {
        return Err(MonitorError::MalformedPacket("implausible packet size"));
    }

    let mut payload = vec![0u8; size as usize];
    match timeout(wait, stream.read_exact(&mut payload)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => return Err(MonitorError::RconConnectionError(e)),
        Err(_) => return Err(timeout_error("rcon read timed out")),
    }
    RconPacket::decode(&payload)
}

// ---------------------------------------------------------------------------
// Player-list text parsing
// ---------------------------------------------------------------------------

/// Quake3 `status` column output:
/// `num score ping guid name lastmsg address qport rate`, where the name can
/// contain spaces, so the trailing columns are taken from the end of the row.
fn parse_quake3_players(output: &str) -> Vec<RconPlayer> {
    let mut players = Vec::new();
    let mut lines = output.lines();

    for line in &mut lines {
        let trimmed = line.trim_start();
        if trimmed.starts_with("num") && trimmed.contains("score") {
            break;
        }
    }

    for line in lines {
        if line.trim_start().starts_with("---") {
            continue;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 9 {
            continue;
        }
        let num = match tokens[0].parse::<i32>() {
            Ok(num) => num,
            Err(_) => continue,
        };
        if tokens[1].parse::<i32>().is_err() || tokens[2].parse::<i32>().is_err() {
            continue;
        }
        let guid = tokens[3].to_string();
        let rate = tokens[tokens.len() - 1].parse().ok();
        let address = tokens[tokens.len() - 3];
        let name = tokens[4..tokens.len() - 4].join(" ");

        players.push(RconPlayer {
            num,
            guid,
            normalized_name: normalized_name(ProtocolFamily::Quake3, &name),
            name,
            ip_address: strip_port(address),
            rate,
        });
    }
    players
}

/// Source `status` line output:
/// `# userid "name" uniqueid connected ping loss state [rate] adr`, with a
/// spare column on some engine branches between userid and the name.
fn parse_source_players(output: &str) -> Vec<RconPlayer> {
    let mut players = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        if !line.starts_with('#') || line.starts_with("#end") {
            continue;
        }
        let (open, close) = match (line.find('"'), line.rfind('"')) {
            (Some(open), Some(close)) if close > open => (open, close),
            _ => continue,
        };
        let name = line[open + 1..close].to_string();

        let before: Vec<&str> = line[..open].split_whitespace().collect();
        let num = match before.get(1).and_then(|v| v.parse::<i32>().ok()) {
            Some(num) => num,
            None => continue,
        };

        let after: Vec<&str> = line[close + 1..].split_whitespace().collect();
        let guid = match after.first() {
            Some(guid) => guid.to_string(),
            None => continue,
        };
        let address = match after.last() {
            // Bots report no endpoint and cannot be joined against anything.
            Some(address) if address.contains(':') => address,
            _ => continue,
        };
        let rate = if after.len() >= 2 {
            after[after.len() - 2].parse().ok()
        } else {
            None
        };

        players.push(RconPlayer {
            num,
            guid,
            normalized_name: normalized_name(ProtocolFamily::Source, &name),
            name,
            ip_address: strip_port(address),
            rate,
        });
    }
    players
}

fn strip_port(address: &str) -> String {
    address.split(':').next().unwrap_or(address).to_string()
}
