//! The session task: owns the socket, drives the handshake, decodes the
//! framebuffer update stream, and relays [`SessionCommand`]s / [`SessionEvent`]s
//! across an mpsc boundary so the host never touches the transport directly.

use std::sync::Once;
use std::time::Duration;

use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use tokio_rustls::TlsConnector;

use crate::vnc::audio::{AudioFormat, AudioSample, AudioSink, AUDIO_FLUSH_INTERVAL};
use crate::vnc::auth;
use crate::vnc::encoding;
use crate::vnc::error::VncError;
use crate::vnc::framebuffer::Framebuffer;
use crate::vnc::protocol;
use crate::vnc::types::{
    EncodingType, PixelFormat, RfbVersion, SecurityType, ServerMessageType, VeNCryptSubAuth,
    VncConfig,
};
use crate::vnc::zlib::{TightZlibPool, ZlibStream};

// ── Transport ────────────────────────────────────────────────────────────

/// Anything the session can speak RFB bytes over — a bare `TcpStream`, or
/// a `TlsStream` wrapping one once VeNCrypt/legacy-TLS negotiation wraps
/// the channel. Type-erased rather than a closed enum so TLS-over-plain
/// composes without duplicating the handshake/session loop per variant;
/// the session task remains the sole owner of whichever concrete stream
/// is boxed in here.
trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

type Transport = Box<dyn AsyncStream>;

fn ensure_crypto_provider_installed() {
    static INSTALLED: Once = Once::new();
    INSTALLED.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

// ── Low-level byte helpers (used both pre-split and post-split) ─────────

async fn read_exact_n<R: AsyncRead + Unpin>(reader: &mut R, n: usize) -> Result<Vec<u8>, VncError> {
    let mut buf = vec![0u8; n];
    reader.read_exact(&mut buf).await.map_err(VncError::from_io)?;
    Ok(buf)
}

async fn read_u8<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u8, VncError> {
    Ok(read_exact_n(reader, 1).await?[0])
}

async fn read_u16<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u16, VncError> {
    let b = read_exact_n(reader, 2).await?;
    Ok(u16::from_be_bytes([b[0], b[1]]))
}

async fn read_u32<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u32, VncError> {
    let b = read_exact_n(reader, 4).await?;
    Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

async fn write_all<W: AsyncWrite + Unpin>(writer: &mut W, buf: &[u8]) -> Result<(), VncError> {
    writer.write_all(buf).await.map_err(VncError::from_io)?;
    writer.flush().await.map_err(VncError::from_io)?;
    Ok(())
}

// ── Commands / events ────────────────────────────────────────────────────

/// Host → session commands, sent over an unbounded channel.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    SetPixelFormat(PixelFormat),
    SetEncodings(Vec<String>),
    FramebufferUpdateRequest { incremental: bool, x: u16, y: u16, width: u16, height: u16 },
    KeyEvent { down: bool, key: u32 },
    ExtendedKeyEvent { down: bool, keysym: u32, keycode: u32 },
    PointerEvent { button_mask: u8, x: u16, y: u16 },
    ClientCutText(String),
    AudioEnable,
    AudioDisable,
    AudioSetFormat(AudioFormat),
    Shutdown,
}

/// Session → host events, sent over an unbounded channel.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Connected,
    Initialized { width: u16, height: u16, name: String, pixel_format: PixelFormat },
    FramebufferUpdated,
    Bell,
    ServerCutText(String),
    CursorChanged { width: u16, height: u16, hotspot_x: u16, hotspot_y: u16, rgba: Vec<u8> },
    PointerPosition { x: u16, y: u16 },
    DesktopResize { width: u16, height: u16 },
    PixelFormatChanged(PixelFormat),
    LedState(u8),
    AuthFailure(Option<String>),
    AuthUnsupported(String),
    Disconnected,
    Error(String),
}

/// A handle to a spawned session task. Dropping it does not itself stop
/// the task — call [`shutdown`](Self::shutdown) or [`abort`](Self::abort).
pub struct VncSessionHandle {
    pub id: String,
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
    event_rx: mpsc::UnboundedReceiver<SessionEvent>,
    task: tokio::task::JoinHandle<()>,
}

impl VncSessionHandle {
    /// Spawn the session task and return immediately. Connection, auth,
    /// and init failures surface later as `SessionEvent::Error` /
    /// `SessionEvent::AuthFailure` / `SessionEvent::Disconnected` rather
    /// than as a synchronous `Result`, since the task is the sole owner
    /// of the socket and the real `TcpStream::connect` only happens once
    /// it's actually running.
    pub fn connect(
        id: impl Into<String>,
        config: VncConfig,
        framebuffer: Box<dyn Framebuffer>,
        audio_sink: Box<dyn AudioSink>,
    ) -> Self {
        let id = id.into();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(session_task(config, framebuffer, audio_sink, cmd_rx, event_tx));
        Self { id, cmd_tx, event_rx, task }
    }

    pub fn send_command(&self, cmd: SessionCommand) -> Result<(), VncError> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| VncError::protocol("session task is no longer running"))
    }

    pub async fn recv_event(&mut self) -> Option<SessionEvent> {
        self.event_rx.recv().await
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(SessionCommand::Shutdown);
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

async fn session_task(
    config: VncConfig,
    framebuffer: Box<dyn Framebuffer>,
    audio_sink: Box<dyn AudioSink>,
    cmd_rx: mpsc::UnboundedReceiver<SessionCommand>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
) {
    if let Err(e) = run_session(config, framebuffer, audio_sink, cmd_rx, event_tx.clone()).await {
        log::warn!("vnc session ended: {e}");
        match &e {
            VncError::AuthFailed(reason) => {
                let _ = event_tx.send(SessionEvent::AuthFailure(reason.clone()));
            }
            VncError::AuthUnsupported(msg) => {
                let _ = event_tx.send(SessionEvent::AuthUnsupported(msg.clone()));
            }
            _ => {}
        }
        let _ = event_tx.send(SessionEvent::Error(e.to_string()));
    }
    let _ = event_tx.send(SessionEvent::Disconnected);
}

async fn run_session(
    config: VncConfig,
    framebuffer: Box<dyn Framebuffer>,
    audio_sink: Box<dyn AudioSink>,
    cmd_rx: mpsc::UnboundedReceiver<SessionCommand>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
) -> Result<(), VncError> {
    ensure_crypto_provider_installed();

    let addr = format!("{}:{}", config.host, config.port);
    let connect_timeout = Duration::from_secs(config.connect_timeout_secs.max(1));
    let tcp = timeout(connect_timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| VncError::protocol(format!("connect to {addr} timed out")))?
        .map_err(VncError::from_io)?;
    let stream: Transport = Box::new(tcp);

    let _ = event_tx.send(SessionEvent::Connected);

    run_session_over(stream, config, framebuffer, audio_sink, cmd_rx, event_tx).await
}

/// The testable core of the session: everything after the TCP connect.
/// Split out so tests can drive it over a `tokio::io::duplex` pair.
async fn run_session_over(
    mut stream: Transport,
    config: VncConfig,
    framebuffer: Box<dyn Framebuffer>,
    audio_sink: Box<dyn AudioSink>,
    mut cmd_rx: mpsc::UnboundedReceiver<SessionCommand>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
) -> Result<(), VncError> {
    let version = perform_version_handshake(&mut stream).await?;
    let security_type = negotiate_security_type(&mut stream, version).await?;
    let mut stream = run_auth(stream, security_type, version, &config).await?;

    let (width, height, mut pixel_format, name) = initialize_session(&mut stream, &config).await?;

    if let Some(requested) = config.pixel_format {
        write_all(&mut stream, &protocol::build_set_pixel_format(&requested)).await?;
        pixel_format = requested;
    }

    let encodings = protocol::apply_zrle_format_policy(
        protocol::resolve_encodings(&config.encodings, config.local_cursor),
        &pixel_format,
    );
    write_all(&mut stream, &protocol::build_set_encodings(&encodings)).await?;

    let _ = event_tx.send(SessionEvent::Initialized { width, height, name, pixel_format });

    let mut framebuffer = framebuffer;
    framebuffer.resize(width, height);

    let mut state = SessionState {
        width,
        height,
        pixel_format,
        zrle_stream: ZlibStream::new(),
        tight_pool: TightZlibPool::new(),
        audio_sample: AudioSample::new(),
        framebuffer,
        audio_sink,
        audio_enabled: false,
        local_cursor: config.local_cursor,
        view_only: config.view_only,
        last_update_request: Some((false, 0, 0, width, height)),
    };

    write_all(&mut stream, &protocol::build_fb_update_request(false, 0, 0, width, height)).await?;

    let (mut reader, mut writer) = split(stream);

    let mut audio_flush = interval(AUDIO_FLUSH_INTERVAL);
    let mut update_timer = interval(Duration::from_millis(config.update_interval_ms.max(1)));

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(cmd) => handle_command(&mut writer, cmd, &mut state).await?,
                }
            }
            result = read_next_message(&mut reader, &mut state, &event_tx) => {
                if result? {
                    if let Some((incremental, x, y, w, h)) = state.last_update_request {
                        write_all(&mut writer, &protocol::build_fb_update_request(incremental, x, y, w, h)).await?;
                    }
                }
            }
            _ = audio_flush.tick() => {
                if !state.audio_sample.is_empty() {
                    let pcm = state.audio_sample.take();
                    state.audio_sink.push_samples(&pcm);
                }
            }
            _ = update_timer.tick() => {
                let buf = protocol::build_fb_update_request(true, 0, 0, state.width, state.height);
                write_all(&mut writer, &buf).await?;
            }
        }
    }

    Ok(())
}

// ── Version handshake ────────────────────────────────────────────────────

async fn perform_version_handshake(stream: &mut Transport) -> Result<RfbVersion, VncError> {
    let mut banner = [0u8; 12];
    stream.read_exact(&mut banner).await.map_err(VncError::from_io)?;
    let banner_str = protocol::parse_version_string(&banner);
    let version = RfbVersion::from_version_string(&banner_str)
        .ok_or_else(|| VncError::protocol(format!("unsupported RFB version banner {banner_str:?}")))?;

    let reply: &[u8; 12] = match version {
        RfbVersion::V3_3 => b"RFB 003.003\n",
        RfbVersion::V3_7 => b"RFB 003.007\n",
        RfbVersion::V3_8 => RfbVersion::client_version_string(),
    };
    write_all(stream, reply).await?;
    log::info!("negotiated RFB version {version}");
    Ok(version)
}

// ── Security type negotiation ────────────────────────────────────────────

async fn read_failure_reason(stream: &mut Transport) -> Result<String, VncError> {
    let len = (read_u32(stream).await? as usize).min(65536);
    let bytes = read_exact_n(stream, len).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

async fn negotiate_security_type(
    stream: &mut Transport,
    version: RfbVersion,
) -> Result<SecurityType, VncError> {
    match version {
        RfbVersion::V3_3 => {
            let raw = read_u32(stream).await?;
            match protocol::parse_security_type_3_3(&raw.to_be_bytes())? {
                None => {
                    let reason = read_failure_reason(stream).await?;
                    Err(VncError::AuthUnsupported(reason))
                }
                Some(v) => SecurityType::from_u32(v)
                    .ok_or_else(|| VncError::AuthUnsupported(format!("unrecognized security type {v}"))),
            }
        }
        RfbVersion::V3_7 | RfbVersion::V3_8 => {
            let count = read_u8(stream).await?;
            if count == 0 {
                let reason = read_failure_reason(stream).await?;
                return Err(VncError::AuthUnsupported(reason));
            }
            let raw = read_exact_n(stream, count as usize).await?;
            let codes = protocol::parse_security_types(count, &raw);
            let types: Vec<SecurityType> = codes.iter().filter_map(|b| SecurityType::from_byte(*b)).collect();
            let chosen = auth::select_security_type(&types)
                .ok_or_else(|| VncError::AuthUnsupported("server offered no supported security type".into()))?;
            write_all(stream, &auth::build_security_type_selection(&chosen)).await?;
            Ok(chosen)
        }
    }
}

fn security_result_expected(version: RfbVersion, security_type: &SecurityType) -> bool {
    match version {
        RfbVersion::V3_3 => !matches!(security_type, SecurityType::None),
        _ => true,
    }
}

async fn check_security_result(stream: &mut Transport, version: RfbVersion) -> Result<(), VncError> {
    let status_bytes = read_exact_n(stream, 4).await?;
    let status = u32::from_be_bytes([status_bytes[0], status_bytes[1], status_bytes[2], status_bytes[3]]);
    if status == 0 {
        return auth::parse_security_result(&status_bytes);
    }
    if version == RfbVersion::V3_3 {
        return Err(VncError::AuthFailed(None));
    }
    let reason_len = (read_u32(stream).await? as usize).min(65536);
    let reason = read_exact_n(stream, reason_len).await?;
    let mut buf = status_bytes;
    buf.extend_from_slice(&(reason_len as u32).to_be_bytes());
    buf.extend_from_slice(&reason);
    auth::parse_security_result(&buf)
}

// ── Auth dispatch ─────────────────────────────────────────────────────────

/// Which credential exchange an (optionally TLS-wrapped) security type
/// resolves to once the security-type-specific framing is stripped away.
enum InnerAuthKind {
    None,
    Vnc,
    Plain,
    Sasl,
}

/// Run the credential exchange shared by plain, legacy-TLS, and VeNCrypt
/// security types once the transport and `InnerAuthKind` are known.
async fn run_inner_credential_exchange(
    stream: &mut Transport,
    kind: InnerAuthKind,
    config: &VncConfig,
    under_tls: bool,
) -> Result<(), VncError> {
    match kind {
        InnerAuthKind::None => Ok(()),
        InnerAuthKind::Vnc => {
            let challenge_bytes = read_exact_n(stream, 16).await?;
            let mut challenge = [0u8; 16];
            challenge.copy_from_slice(&challenge_bytes);
            let password = config.password.as_deref().unwrap_or("");
            let response = auth::vnc_des::respond_to_challenge(&challenge, password)?;
            write_all(stream, &response).await
        }
        InnerAuthKind::Plain => {
            // VeNCrypt's Plain subauth: u32 ulen + u32 plen + username + password,
            // sent directly — distinct from SASL's PLAIN mechanism envelope.
            let username = config.username.as_deref().unwrap_or("");
            let password = config.password.as_deref().unwrap_or("");
            let mut buf = Vec::with_capacity(8 + username.len() + password.len());
            buf.extend_from_slice(&(username.len() as u32).to_be_bytes());
            buf.extend_from_slice(&(password.len() as u32).to_be_bytes());
            buf.extend_from_slice(username.as_bytes());
            buf.extend_from_slice(password.as_bytes());
            write_all(stream, &buf).await
        }
        InnerAuthKind::Sasl => run_sasl_auth(stream, config, under_tls).await,
    }
}

async fn run_auth(
    mut stream: Transport,
    security_type: SecurityType,
    version: RfbVersion,
    config: &VncConfig,
) -> Result<Transport, VncError> {
    match security_type {
        SecurityType::None => {
            run_inner_credential_exchange(&mut stream, InnerAuthKind::None, config, false).await?;
            if security_result_expected(version, &security_type) {
                check_security_result(&mut stream, version).await?;
            }
            Ok(stream)
        }
        // Tight's security type historically layers a tunnel-capability
        // negotiation before falling back to VNC-DES; this engine skips
        // the tunnel list and always runs plain VNC-DES underneath it.
        SecurityType::VncAuthentication | SecurityType::Tight => {
            run_inner_credential_exchange(&mut stream, InnerAuthKind::Vnc, config, false).await?;
            check_security_result(&mut stream, version).await?;
            Ok(stream)
        }
        SecurityType::MsLogon => {
            let raw = read_exact_n(&mut stream, 24).await?;
            let params = auth::mslogon::MsLoginDhParams::parse(&raw)?;
            let result = auth::mslogon::perform_dh(&params);
            write_all(&mut stream, &result.client_public).await?;
            let username = config.username.as_deref().unwrap_or("");
            let password = config.password.as_deref().unwrap_or("");
            let creds = auth::mslogon::build_credentials(username, password, &result.shared_key);
            write_all(&mut stream, &creds).await?;
            check_security_result(&mut stream, version).await?;
            Ok(stream)
        }
        SecurityType::AppleRemoteDesktop => {
            let gen_len = read_u16(&mut stream).await? as usize;
            let generator = read_exact_n(&mut stream, gen_len).await?;
            let mod_len = read_u16(&mut stream).await? as usize;
            let modulus = read_exact_n(&mut stream, mod_len).await?;
            let server_public = read_exact_n(&mut stream, mod_len).await?;

            let mut raw = Vec::with_capacity(4 + gen_len + 2 * mod_len);
            raw.extend_from_slice(&(gen_len as u16).to_be_bytes());
            raw.extend_from_slice(&generator);
            raw.extend_from_slice(&(mod_len as u16).to_be_bytes());
            raw.extend_from_slice(&modulus);
            raw.extend_from_slice(&server_public);

            let params = auth::ard::ArdDhParams::parse(&raw)?;
            let result = auth::ard::perform_dh(&params);
            write_all(&mut stream, &result.client_public).await?;
            let username = config.username.as_deref().unwrap_or("");
            let password = config.password.as_deref().unwrap_or("");
            let creds = auth::ard::build_credentials(username, password, &result.aes_key)?;
            write_all(&mut stream, &creds).await?;
            check_security_result(&mut stream, version).await?;
            Ok(stream)
        }
        SecurityType::Sasl => {
            run_inner_credential_exchange(&mut stream, InnerAuthKind::Sasl, config, false).await?;
            check_security_result(&mut stream, version).await?;
            Ok(stream)
        }
        SecurityType::Tls => run_legacy_tls_auth(stream, version, config).await,
        SecurityType::VeNCrypt => run_vencrypt_auth(stream, version, config).await,
        SecurityType::Other(code) => Err(VncError::AuthUnsupported(format!("unsupported security type {code}"))),
    }
}

async fn tls_wrap(
    stream: Transport,
    host: &str,
    client_config: std::sync::Arc<rustls::ClientConfig>,
) -> Result<Transport, VncError> {
    let connector = TlsConnector::from(client_config);
    let server_name = rustls_pki_types::ServerName::try_from(host.to_owned())
        .map_err(|e| VncError::TlsFailure(e.to_string()))?;
    let tls_stream = connector
        .connect(server_name, stream)
        .await
        .map_err(|e| VncError::TlsFailure(e.to_string()))?;
    Ok(Box::new(tls_stream))
}

async fn run_legacy_tls_auth(
    mut stream: Transport,
    version: RfbVersion,
    config: &VncConfig,
) -> Result<Transport, VncError> {
    let client_config = auth::tls::anonymous_client_config();
    stream = tls_wrap(stream, &config.host, client_config).await?;

    let count = read_u8(&mut stream).await?;
    let raw = read_exact_n(&mut stream, count as usize).await?;
    let types: Vec<SecurityType> = protocol::parse_security_types(count, &raw)
        .iter()
        .filter_map(|b| SecurityType::from_byte(*b))
        .collect();
    let chosen = auth::select_security_type(&types)
        .ok_or_else(|| VncError::AuthUnsupported("TLS tunnel offered no supported inner auth".into()))?;
    write_all(&mut stream, &auth::build_security_type_selection(&chosen)).await?;

    let kind = match chosen {
        SecurityType::None => InnerAuthKind::None,
        SecurityType::VncAuthentication | SecurityType::Tight => InnerAuthKind::Vnc,
        SecurityType::Sasl => InnerAuthKind::Sasl,
        other => return Err(VncError::AuthUnsupported(format!("unsupported inner auth under TLS: {other}"))),
    };
    run_inner_credential_exchange(&mut stream, kind, config, true).await?;
    check_security_result(&mut stream, version).await?;
    Ok(stream)
}

async fn run_vencrypt_auth(
    mut stream: Transport,
    version: RfbVersion,
    config: &VncConfig,
) -> Result<Transport, VncError> {
    let major = read_u8(&mut stream).await?;
    let minor = read_u8(&mut stream).await?;
    // The only version this engine speaks is 0.2; anything else is refused
    // up front rather than attempting a downgrade negotiation.
    if major != 0 || minor != 2 {
        write_all(&mut stream, &[0]).await?;
        return Err(VncError::TlsFailure(format!("unsupported VeNCrypt version {major}.{minor}")));
    }
    write_all(&mut stream, &[major, minor]).await?;

    let status = read_u8(&mut stream).await?;
    if status != 0 {
        return Err(VncError::AuthUnsupported("server rejected VeNCrypt version".into()));
    }

    let count = read_u8(&mut stream).await?;
    let mut subauths = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let code = read_u32(&mut stream).await?;
        if let Some(sub) = VeNCryptSubAuth::from_u32(code) {
            subauths.push(sub);
        }
    }
    let chosen = subauths
        .first()
        .copied()
        .ok_or_else(|| VncError::AuthUnsupported("no recognized VeNCrypt subauth offered".into()))?;
    write_all(&mut stream, &chosen.to_u32().to_be_bytes()).await?;

    let under_tls = chosen.uses_tls();
    if under_tls {
        let client_config = if chosen.uses_x509() {
            auth::tls::x509_client_config(&config.x509)?
        } else {
            auth::tls::anonymous_client_config()
        };
        stream = tls_wrap(stream, &config.host, client_config).await?;
    }

    let kind = match chosen {
        VeNCryptSubAuth::Plain | VeNCryptSubAuth::TlsPlain | VeNCryptSubAuth::X509Plain => InnerAuthKind::Plain,
        VeNCryptSubAuth::TlsNone | VeNCryptSubAuth::X509None => InnerAuthKind::None,
        VeNCryptSubAuth::TlsVnc | VeNCryptSubAuth::X509Vnc => InnerAuthKind::Vnc,
        VeNCryptSubAuth::TlsSasl | VeNCryptSubAuth::X509Sasl => InnerAuthKind::Sasl,
    };
    run_inner_credential_exchange(&mut stream, kind, config, under_tls).await?;
    check_security_result(&mut stream, version).await?;
    Ok(stream)
}

// ── SASL ─────────────────────────────────────────────────────────────────

async fn write_mech_name(stream: &mut Transport, name: &str) -> Result<(), VncError> {
    let mut buf = Vec::with_capacity(4 + name.len());
    buf.extend_from_slice(&(name.len() as u32).to_be_bytes());
    buf.extend_from_slice(name.as_bytes());
    write_all(stream, &buf).await
}

/// SASL's "present but possibly empty" blob framing: `None` means the
/// client has no initial response at all (length 0), `Some(&[])` still
/// sends a zero-length-but-present blob distinctly from no blob.
fn encode_sasl_blob(blob: Option<&[u8]>) -> Vec<u8> {
    match blob {
        None => 0u32.to_be_bytes().to_vec(),
        Some(bytes) => {
            let mut out = Vec::with_capacity(4 + bytes.len());
            out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
            out.extend_from_slice(bytes);
            out
        }
    }
}

async fn read_sasl_server_step(stream: &mut Transport) -> Result<(Vec<u8>, bool), VncError> {
    let len = (read_u32(stream).await? as usize).min(1024 * 1024);
    let bytes = read_exact_n(stream, len).await?;
    let complete = read_u8(stream).await? != 0;
    Ok((bytes, complete))
}

async fn run_sasl_auth(stream: &mut Transport, config: &VncConfig, under_tls: bool) -> Result<(), VncError> {
    // The hand-rolled mechanisms below only ever negotiate `qop=auth`
    // (no confidentiality layer, SSF always 0), which can't satisfy the
    // "SASL requires SSF >= 56 outside TLS" policy. Refuse outright
    // before any I/O rather than pretend to negotiate it.
    if !under_tls {
        return Err(VncError::local_policy(
            "refusing SASL without a TLS channel: this engine's SASL mechanisms provide no confidentiality layer",
        ));
    }

    let mechlist_len = (read_u32(stream).await? as usize).min(300);
    let mechlist_bytes = read_exact_n(stream, mechlist_len).await?;
    let mechlist = String::from_utf8_lossy(&mechlist_bytes);
    let mechs: Vec<&str> = mechlist.split_whitespace().collect();

    let username = config.username.as_deref().unwrap_or("");
    let password = config.password.as_deref().unwrap_or("");

    if mechs.iter().any(|m| m.eq_ignore_ascii_case("DIGEST-MD5")) {
        run_sasl_digest_md5(stream, &config.host, username, password).await
    } else if mechs.iter().any(|m| m.eq_ignore_ascii_case("PLAIN")) {
        run_sasl_plain(stream, username, password).await
    } else {
        Err(VncError::SaslFailure(format!("no supported SASL mechanism in {mechlist:?}")))
    }
}

async fn run_sasl_plain(stream: &mut Transport, username: &str, password: &str) -> Result<(), VncError> {
    let mut mech = auth::sasl::PlainMechanism::new();
    write_mech_name(stream, "PLAIN").await?;
    let step = mech.step(username, password)?;
    write_all(stream, &encode_sasl_blob(step.client_out.as_deref())).await?;

    let (_, complete) = read_sasl_server_step(stream).await?;
    if complete {
        return Ok(());
    }
    let step = mech.step(username, password)?;
    write_all(stream, &encode_sasl_blob(step.client_out.as_deref())).await?;
    let (_, complete) = read_sasl_server_step(stream).await?;
    if complete {
        Ok(())
    } else {
        Err(VncError::SaslFailure("server did not complete PLAIN negotiation".into()))
    }
}

async fn run_sasl_digest_md5(
    stream: &mut Transport,
    host: &str,
    username: &str,
    password: &str,
) -> Result<(), VncError> {
    let mut mech = auth::sasl::DigestMd5Mechanism::new();
    write_mech_name(stream, "DIGEST-MD5").await?;
    // No initial response: the client waits for the server's challenge.
    write_all(stream, &encode_sasl_blob(None)).await?;

    let (challenge, complete) = read_sasl_server_step(stream).await?;
    if complete {
        return Err(VncError::SaslFailure("server completed before sending a DIGEST-MD5 challenge".into()));
    }
    let digest_uri = format!("vnc/{host}");
    let step = mech.step(&challenge, username, password, "", &digest_uri)?;
    write_all(stream, &encode_sasl_blob(step.client_out.as_deref())).await?;

    let (rspauth, complete) = read_sasl_server_step(stream).await?;
    if complete {
        return Ok(());
    }
    let step = mech.step(&rspauth, username, password, "", &digest_uri)?;
    write_all(stream, &encode_sasl_blob(step.client_out.as_deref())).await?;
    let (_, complete) = read_sasl_server_step(stream).await?;
    if complete {
        Ok(())
    } else {
        Err(VncError::SaslFailure("server did not confirm rspauth".into()))
    }
}

// ── Initialization ────────────────────────────────────────────────────────

async fn initialize_session(
    stream: &mut Transport,
    config: &VncConfig,
) -> Result<(u16, u16, PixelFormat, String), VncError> {
    write_all(stream, &protocol::build_client_init(config.shared)).await?;

    let mut fixed = read_exact_n(stream, 24).await?;
    let name_len = u32::from_be_bytes([fixed[20], fixed[21], fixed[22], fixed[23]]) as usize;
    let name_len = name_len.min(4096);
    let name_bytes = read_exact_n(stream, name_len).await?;
    fixed.extend_from_slice(&name_bytes);

    protocol::parse_server_init(&fixed).map_err(VncError::from)
}

// ── Session state ─────────────────────────────────────────────────────────

struct SessionState {
    width: u16,
    height: u16,
    pixel_format: PixelFormat,
    zrle_stream: ZlibStream,
    tight_pool: TightZlibPool,
    audio_sample: AudioSample,
    framebuffer: Box<dyn Framebuffer>,
    audio_sink: Box<dyn AudioSink>,
    audio_enabled: bool,
    local_cursor: bool,
    view_only: bool,
    /// The most recently sent `FramebufferUpdateRequest` params, kept so
    /// the PointerChange/LedState/RichCursor/ExtendedKeyEvent pseudo-
    /// encodings can re-issue the same request once they've been applied.
    last_update_request: Option<(bool, u16, u16, u16, u16)>,
}

async fn handle_command<W: AsyncWrite + Unpin>(
    writer: &mut W,
    cmd: SessionCommand,
    state: &mut SessionState,
) -> Result<(), VncError> {
    match cmd {
        SessionCommand::Shutdown => Ok(()),
        SessionCommand::KeyEvent { .. } | SessionCommand::ExtendedKeyEvent { .. } | SessionCommand::PointerEvent { .. }
            if state.view_only =>
        {
            Ok(())
        }
        SessionCommand::SetPixelFormat(pf) => {
            state.pixel_format = pf;
            state.framebuffer.set_pixel_format(&pf);
            write_all(writer, &protocol::build_set_pixel_format(&pf)).await
        }
        SessionCommand::SetEncodings(names) => {
            let encodings = protocol::apply_zrle_format_policy(
                protocol::resolve_encodings(&names, state.local_cursor),
                &state.pixel_format,
            );
            write_all(writer, &protocol::build_set_encodings(&encodings)).await
        }
        SessionCommand::FramebufferUpdateRequest { incremental, x, y, width, height } => {
            state.last_update_request = Some((incremental, x, y, width, height));
            write_all(writer, &protocol::build_fb_update_request(incremental, x, y, width, height)).await
        }
        SessionCommand::KeyEvent { down, key } => write_all(writer, &protocol::build_key_event(down, key)).await,
        SessionCommand::ExtendedKeyEvent { down, keysym, keycode } => {
            write_all(writer, &protocol::build_extended_key_event(down, keysym, keycode)).await
        }
        SessionCommand::PointerEvent { button_mask, x, y } => {
            write_all(writer, &protocol::build_pointer_event(button_mask, x, y)).await
        }
        SessionCommand::ClientCutText(text) => write_all(writer, &protocol::build_client_cut_text(&text)).await,
        SessionCommand::AudioEnable => {
            state.audio_enabled = true;
            write_all(writer, &protocol::build_qemu_audio_enable()).await
        }
        SessionCommand::AudioDisable => {
            state.audio_enabled = false;
            write_all(writer, &protocol::build_qemu_audio_disable()).await
        }
        SessionCommand::AudioSetFormat(format) => {
            state.audio_sink.configure(format);
            write_all(writer, &protocol::build_qemu_audio_set_format(format)).await
        }
    }
}

// ── Server message loop ───────────────────────────────────────────────────

/// Returns `Ok(true)` when the caller should re-issue the last saved
/// `FramebufferUpdateRequest` (a pseudo-encoding that doesn't itself carry
/// a framebuffer update was just applied and the server is waiting on a
/// fresh request to resume sending incremental updates).
async fn read_next_message<R: AsyncRead + Unpin>(
    reader: &mut R,
    state: &mut SessionState,
    event_tx: &mpsc::UnboundedSender<SessionEvent>,
) -> Result<bool, VncError> {
    let type_byte = read_u8(reader).await?;
    let msg_type = protocol::parse_server_message_type(type_byte)
        .ok_or_else(|| VncError::protocol(format!("unknown server message type {type_byte}")))?;

    match msg_type {
        ServerMessageType::FramebufferUpdate => handle_framebuffer_update(reader, state, event_tx).await,
        ServerMessageType::SetColourMapEntries => {
            handle_set_colour_map(reader, state).await?;
            Ok(false)
        }
        ServerMessageType::Bell => {
            let _ = event_tx.send(SessionEvent::Bell);
            Ok(false)
        }
        ServerMessageType::ServerCutText => {
            handle_server_cut_text(reader, event_tx).await?;
            Ok(false)
        }
        ServerMessageType::QemuServerMessage => {
            handle_qemu_message(reader, state).await?;
            Ok(false)
        }
    }
}

async fn handle_framebuffer_update<R: AsyncRead + Unpin>(
    reader: &mut R,
    state: &mut SessionState,
    event_tx: &mpsc::UnboundedSender<SessionEvent>,
) -> Result<bool, VncError> {
    let _padding = read_u8(reader).await?;
    let count = read_u16(reader).await?;

    let mut needs_resend = false;
    for _ in 0..count {
        let header = read_exact_n(reader, 12).await?;
        let (x, y, w, h, enc) = protocol::parse_rect_header(&header)?;
        if decode_rect(reader, state, x, y, w, h, enc, event_tx).await? {
            needs_resend = true;
        }
    }

    let _ = event_tx.send(SessionEvent::FramebufferUpdated);
    Ok(needs_resend)
}

const PIXEL_RECT_ENCODINGS: &[EncodingType] = &[
    EncodingType::Raw,
    EncodingType::CopyRect,
    EncodingType::RRE,
    EncodingType::Hextile,
    EncodingType::ZRLE,
    EncodingType::Tight,
];

async fn decode_rect<R: AsyncRead + Unpin>(
    reader: &mut R,
    state: &mut SessionState,
    x: u16,
    y: u16,
    w: u16,
    h: u16,
    enc: EncodingType,
    event_tx: &mpsc::UnboundedSender<SessionEvent>,
) -> Result<bool, VncError> {
    if PIXEL_RECT_ENCODINGS.contains(&enc)
        && (x as u32 + w as u32 > state.width as u32 || y as u32 + h as u32 > state.height as u32)
    {
        return Err(VncError::protocol(format!(
            "rectangle ({x},{y},{w}x{h}) exceeds framebuffer {}x{}",
            state.width, state.height
        )));
    }

    match enc {
        EncodingType::Raw => {
            let size = encoding::raw_data_size(w, h, &state.pixel_format);
            let data = read_exact_n(reader, size).await?;
            encoding::raw::decode(state.framebuffer.as_mut(), x, y, w, h, &data, &state.pixel_format)?;
            Ok(false)
        }
        EncodingType::CopyRect => {
            let data = read_exact_n(reader, 4).await?;
            encoding::copyrect::decode(state.framebuffer.as_mut(), x, y, w, h, &data)?;
            Ok(false)
        }
        EncodingType::RRE => {
            let bpp = state.pixel_format.bytes_per_pixel();
            let data = read_rre_bytes(reader, bpp).await?;
            encoding::rre::decode(state.framebuffer.as_mut(), x, y, w, h, &data, &state.pixel_format)?;
            Ok(false)
        }
        EncodingType::Hextile => {
            let bpp = state.pixel_format.bytes_per_pixel();
            let data = read_hextile_bytes(reader, w, h, bpp).await?;
            encoding::hextile::decode(state.framebuffer.as_mut(), x, y, w, h, &data, &state.pixel_format)?;
            Ok(false)
        }
        EncodingType::ZRLE => {
            let len = (read_u32(reader).await? as usize).min(64 * 1024 * 1024);
            let data = read_exact_n(reader, len).await?;
            encoding::zrle::decode(
                state.framebuffer.as_mut(),
                x,
                y,
                w,
                h,
                &data,
                &state.pixel_format,
                &mut state.zrle_stream,
            )?;
            Ok(false)
        }
        EncodingType::Tight => {
            let data = read_tight_bytes(reader, w, h, &state.pixel_format).await?;
            encoding::tight::decode(
                state.framebuffer.as_mut(),
                x,
                y,
                w,
                h,
                &data,
                &state.pixel_format,
                &mut state.tight_pool,
            )?;
            Ok(false)
        }
        EncodingType::DesktopSizePseudo | EncodingType::ExtendedDesktopSizePseudo => {
            state.width = w;
            state.height = h;
            state.framebuffer.resize(w, h);
            let _ = event_tx.send(SessionEvent::DesktopResize { width: w, height: h });
            Ok(false)
        }
        // These four pseudo-encodings carry no framebuffer pixels; the
        // server withholds further incremental updates until the client
        // re-issues its last FramebufferUpdateRequest.
        EncodingType::PointerChangePseudo => {
            let _ = event_tx.send(SessionEvent::PointerPosition { x, y });
            Ok(true)
        }
        EncodingType::LedStatePseudo => {
            let led = read_u8(reader).await?;
            let _ = event_tx.send(SessionEvent::LedState(led));
            Ok(true)
        }
        EncodingType::PixelFormatChangePseudo => {
            let raw = read_exact_n(reader, 16).await?;
            let mut buf = [0u8; 16];
            buf.copy_from_slice(&raw);
            let pf = PixelFormat::from_bytes(&buf);
            state.pixel_format = pf;
            state.framebuffer.set_pixel_format(&pf);
            let _ = event_tx.send(SessionEvent::PixelFormatChanged(pf));
            Ok(false)
        }
        EncodingType::RichCursor => {
            let bpp = state.pixel_format.bytes_per_pixel();
            let pixel_bytes = w as usize * h as usize * bpp;
            let mask_bytes = ((w as usize + 7) / 8) * h as usize;
            let data = read_exact_n(reader, pixel_bytes + mask_bytes).await?;
            let cursor = encoding::cursor::decode_rich_cursor(x, y, w, h, &data, &state.pixel_format)?;
            let _ = event_tx.send(SessionEvent::CursorChanged {
                width: cursor.width,
                height: cursor.height,
                hotspot_x: cursor.hotspot_x,
                hotspot_y: cursor.hotspot_y,
                rgba: cursor.rgba,
            });
            Ok(true)
        }
        EncodingType::XCursor => {
            let plane_bytes = ((w as usize + 7) / 8) * h as usize;
            let data = read_exact_n(reader, 6 + 2 * plane_bytes).await?;
            let cursor = encoding::cursor::decode_xcursor(x, y, w, h, &data)?;
            let _ = event_tx.send(SessionEvent::CursorChanged {
                width: cursor.width,
                height: cursor.height,
                hotspot_x: cursor.hotspot_x,
                hotspot_y: cursor.hotspot_y,
                rgba: cursor.rgba,
            });
            Ok(false)
        }
        EncodingType::ExtendedKeyEventPseudo => Ok(true),
        EncodingType::AudioPseudo | EncodingType::LastRectPseudo | EncodingType::ContinuousUpdatesPseudo => {
            Ok(false)
        }
        EncodingType::TRLE | EncodingType::Other(_) => {
            Err(VncError::protocol(format!("unsupported encoding {}", enc.name())))
        }
    }
}

/// Structural-only replay of Hextile's tile walk to find the byte length
/// owned by the rectangle on the wire — the actual pixel decode still
/// happens in `encoding::hextile::decode` against the fully-read buffer.
async fn read_hextile_bytes<R: AsyncRead + Unpin>(
    reader: &mut R,
    width: u16,
    height: u16,
    bpp: usize,
) -> Result<Vec<u8>, VncError> {
    use crate::vnc::encoding::hextile::{ANY_SUBRECTS, BG_SPECIFIED, FG_SPECIFIED, RAW, SUBRECTS_COLOURED};

    let w = width as usize;
    let h = height as usize;
    let tiles_x = (w + 15) / 16;
    let tiles_y = (h + 15) / 16;

    let mut out = Vec::new();
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let tile_w = std::cmp::min(16, w - tx * 16);
            let tile_h = std::cmp::min(16, h - ty * 16);

            let flags = read_u8(reader).await?;
            out.push(flags);

            if flags & RAW != 0 {
                let raw_size = tile_w * tile_h * bpp;
                out.extend_from_slice(&read_exact_n(reader, raw_size).await?);
                continue;
            }
            if flags & BG_SPECIFIED != 0 {
                out.extend_from_slice(&read_exact_n(reader, bpp).await?);
            }
            if flags & FG_SPECIFIED != 0 {
                out.extend_from_slice(&read_exact_n(reader, bpp).await?);
            }
            if flags & ANY_SUBRECTS != 0 {
                let count = read_u8(reader).await?;
                out.push(count);
                for _ in 0..count {
                    if flags & SUBRECTS_COLOURED != 0 {
                        out.extend_from_slice(&read_exact_n(reader, bpp).await?);
                    }
                    out.extend_from_slice(&read_exact_n(reader, 2).await?);
                }
            }
        }
    }
    Ok(out)
}

async fn read_rre_bytes<R: AsyncRead + Unpin>(reader: &mut R, bpp: usize) -> Result<Vec<u8>, VncError> {
    let mut out = read_exact_n(reader, 4 + bpp).await?;
    let num_subrects = u32::from_be_bytes([out[0], out[1], out[2], out[3]]) as usize;
    let subrect_size = bpp + 8;
    out.extend_from_slice(&read_exact_n(reader, num_subrects * subrect_size).await?);
    Ok(out)
}

async fn read_cint_from_reader<R: AsyncRead + Unpin>(reader: &mut R) -> Result<(Vec<u8>, u32), VncError> {
    let mut bytes = Vec::with_capacity(protocol::CINT_MAX_LEN);
    loop {
        let b = read_u8(reader).await?;
        bytes.push(b);
        if b & 0x80 == 0 || bytes.len() == protocol::CINT_MAX_LEN {
            break;
        }
    }
    let (value, _) = protocol::decode_cint(&bytes)?;
    Ok((bytes, value))
}

/// Structural-only replay of Tight's control-byte framing: every payload
/// is either a fixed-size chunk or `cint`-length-prefixed, so the byte
/// length can be determined without touching pixel data.
async fn read_tight_bytes<R: AsyncRead + Unpin>(
    reader: &mut R,
    width: u16,
    height: u16,
    pf: &PixelFormat,
) -> Result<Vec<u8>, VncError> {
    use crate::vnc::encoding::tight::{FILTER_GRADIENT, FILTER_PALETTE, SUBENCODING_FILL, SUBENCODING_JPEG};

    let mut out = Vec::new();
    let control = read_u8(reader).await?;
    out.push(control);
    let low = control & 0x0F;

    if low & SUBENCODING_FILL != 0 && low != SUBENCODING_JPEG {
        let len = protocol::tpixel_len(pf);
        out.extend_from_slice(&read_exact_n(reader, len).await?);
        return Ok(out);
    }

    if low == SUBENCODING_JPEG {
        let (cint_bytes, jpeg_len) = read_cint_from_reader(reader).await?;
        out.extend_from_slice(&cint_bytes);
        out.extend_from_slice(&read_exact_n(reader, jpeg_len as usize).await?);
        return Ok(out);
    }

    let explicit_filter = low & 0x04 != 0;
    let filter = if explicit_filter {
        let f = read_u8(reader).await?;
        out.push(f);
        f
    } else {
        0
    };

    let tpixel_bytes = protocol::tpixel_len(pf);
    let pixel_count = width as usize * height as usize;

    let expected_len = match filter {
        FILTER_PALETTE => {
            let count_minus_one = read_u8(reader).await?;
            out.push(count_minus_one);
            let palette_size = count_minus_one as usize + 1;
            let palette_bytes = palette_size * tpixel_bytes;
            out.extend_from_slice(&read_exact_n(reader, palette_bytes).await?);

            let index_bits = if palette_size <= 2 { 1 } else { 8 };
            let row_bytes = (width as usize * index_bits + 7) / 8;
            row_bytes * height as usize
        }
        FILTER_GRADIENT => pixel_count * tpixel_bytes,
        _ => pixel_count * tpixel_bytes,
    };

    if expected_len >= 12 {
        let (cint_bytes, compressed_len) = read_cint_from_reader(reader).await?;
        out.extend_from_slice(&cint_bytes);
        out.extend_from_slice(&read_exact_n(reader, compressed_len as usize).await?);
    } else {
        out.extend_from_slice(&read_exact_n(reader, expected_len).await?);
    }
    Ok(out)
}

async fn handle_set_colour_map<R: AsyncRead + Unpin>(
    reader: &mut R,
    state: &mut SessionState,
) -> Result<(), VncError> {
    let _padding = read_u8(reader).await?;
    let first_colour = read_u16(reader).await?;
    let count = read_u16(reader).await?;

    let mut colours = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let raw = read_exact_n(reader, 6).await?;
        let r = u16::from_be_bytes([raw[0], raw[1]]);
        let g = u16::from_be_bytes([raw[2], raw[3]]);
        let b = u16::from_be_bytes([raw[4], raw[5]]);
        colours.push((r, g, b));
    }
    state.framebuffer.set_colour_map_entries(first_colour, &colours);
    Ok(())
}

async fn handle_server_cut_text<R: AsyncRead + Unpin>(
    reader: &mut R,
    event_tx: &mpsc::UnboundedSender<SessionEvent>,
) -> Result<(), VncError> {
    let _padding = read_exact_n(reader, 3).await?;
    let len_bytes = read_exact_n(reader, 4).await?;
    let len = protocol::parse_cut_text_length(&len_bytes)?;
    let len = (len as usize).min(32 * 1024 * 1024);
    let bytes = read_exact_n(reader, len).await?;
    let text = String::from_utf8_lossy(&bytes).into_owned();
    let _ = event_tx.send(SessionEvent::ServerCutText(text));
    Ok(())
}

async fn handle_qemu_message<R: AsyncRead + Unpin>(reader: &mut R, state: &mut SessionState) -> Result<(), VncError> {
    let sub_type = read_u8(reader).await?;
    if sub_type != 1 {
        return Err(VncError::protocol(format!("unsupported QEMU submessage type {sub_type}")));
    }
    let op = read_u16(reader).await?;
    match op {
        0 => {
            // Stop: flush whatever's pending immediately.
            if !state.audio_sample.is_empty() {
                let pcm = state.audio_sample.take();
                state.audio_sink.push_samples(&pcm);
            }
            Ok(())
        }
        1 => Ok(()), // Start
        2 => {
            let len = (read_u32(reader).await? as usize).min(1024 * 1024);
            let chunk = read_exact_n(reader, len).await?;
            if state.audio_sample.would_overflow(chunk.len()) {
                let pcm = state.audio_sample.take();
                state.audio_sink.push_samples(&pcm);
            }
            state.audio_sample.push(&chunk);
            Ok(())
        }
        other => Err(VncError::protocol(format!("unsupported QEMU audio op {other}"))),
    }
}
