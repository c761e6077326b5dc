//! VNC/RFB types: configuration, session metadata, pixel formats, events, errors.

use serde::{Deserialize, Serialize};
use std::fmt;

// ── RFB Protocol Version ────────────────────────────────────────────────

/// Supported RFB protocol versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RfbVersion {
    /// RFB 3.3 — original version, limited security.
    V3_3,
    /// RFB 3.7 — multiple security type negotiation.
    V3_7,
    /// RFB 3.8 — improved error reporting.
    V3_8,
}

impl RfbVersion {
    /// Parse from the 12-byte server version string.
    pub fn from_version_string(s: &str) -> Option<Self> {
        let trimmed = s.trim();
        if trimmed.starts_with("RFB 003.008") {
            Some(Self::V3_8)
        } else if trimmed.starts_with("RFB 003.007") {
            Some(Self::V3_7)
        } else if trimmed.starts_with("RFB 003.003") {
            Some(Self::V3_3)
        } else {
            None
        }
    }

    /// The 12-byte version string we send as our client version.
    pub fn client_version_string() -> &'static [u8; 12] {
        b"RFB 003.008\n"
    }
}

impl fmt::Display for RfbVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V3_3 => write!(f, "3.3"),
            Self::V3_7 => write!(f, "3.7"),
            Self::V3_8 => write!(f, "3.8"),
        }
    }
}

// ── Security Types ──────────────────────────────────────────────────────

/// RFB security types (RFC 6143 §7.1.2), extended with the VeNCrypt/SASL/
/// MSLogon types this engine additionally negotiates. `MSLogon`'s wire
/// value (0xFFFFFFFA) does not fit in a byte, so unlike the others it is
/// only ever seen on the 3.3 single-`u32`-type wire form; `from_byte` (the
/// 3.7+ list form) never produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityType {
    /// No authentication required.
    None,
    /// VNC authentication (DES challenge-response).
    VncAuthentication,
    /// Tight security (TightVNC extension).
    Tight,
    /// TLS wrapper (legacy, pre-VeNCrypt).
    Tls,
    /// VeNCrypt — version-negotiated TLS wrapper with layered subauth.
    VeNCrypt,
    /// SASL authentication.
    Sasl,
    /// Microsoft logon (Diffie-Hellman + DES), wire value 0xFFFFFFFA.
    MsLogon,
    /// Apple Remote Desktop (ARD).
    AppleRemoteDesktop,
    /// Unrecognized security type code.
    Other(u32),
}

impl SecurityType {
    pub fn from_byte(b: u8) -> Option<Self> {
        Self::from_u32(b as u32)
    }

    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(Self::None),
            2 => Some(Self::VncAuthentication),
            16 => Some(Self::Tight),
            18 => Some(Self::Tls),
            19 => Some(Self::VeNCrypt),
            20 => Some(Self::Sasl),
            30 => Some(Self::AppleRemoteDesktop),
            0xFFFF_FFFA => Some(Self::MsLogon),
            0 => None,
            other => Some(Self::Other(other)),
        }
    }

    pub fn to_byte(&self) -> u8 {
        self.to_u32() as u8
    }

    pub fn to_u32(&self) -> u32 {
        match self {
            Self::None => 1,
            Self::VncAuthentication => 2,
            Self::Tight => 16,
            Self::Tls => 18,
            Self::VeNCrypt => 19,
            Self::Sasl => 20,
            Self::AppleRemoteDesktop => 30,
            Self::MsLogon => 0xFFFF_FFFA,
            Self::Other(v) => *v,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::VncAuthentication => "VNC Authentication",
            Self::Tight => "Tight",
            Self::Tls => "TLS",
            Self::VeNCrypt => "VeNCrypt",
            Self::Sasl => "SASL",
            Self::MsLogon => "MSLogon",
            Self::AppleRemoteDesktop => "Apple Remote Desktop",
            Self::Other(_) => "Unknown",
        }
    }
}

/// VeNCrypt 32-bit subauth codes (RFB §4.5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VeNCryptSubAuth {
    Plain,
    TlsNone,
    TlsVnc,
    TlsPlain,
    X509None,
    X509Vnc,
    X509Plain,
    TlsSasl,
    X509Sasl,
}

impl VeNCryptSubAuth {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            256 => Some(Self::Plain),
            257 => Some(Self::TlsNone),
            258 => Some(Self::TlsVnc),
            259 => Some(Self::TlsPlain),
            260 => Some(Self::X509None),
            261 => Some(Self::X509Vnc),
            262 => Some(Self::X509Plain),
            263 => Some(Self::TlsSasl),
            264 => Some(Self::X509Sasl),
            _ => None,
        }
    }

    pub fn to_u32(&self) -> u32 {
        match self {
            Self::Plain => 256,
            Self::TlsNone => 257,
            Self::TlsVnc => 258,
            Self::TlsPlain => 259,
            Self::X509None => 260,
            Self::X509Vnc => 261,
            Self::X509Plain => 262,
            Self::TlsSasl => 263,
            Self::X509Sasl => 264,
        }
    }

    /// Whether this subauth wraps the connection in a TLS session at all
    /// (anonymous or x509) before running the inner auth.
    pub fn uses_tls(&self) -> bool {
        !matches!(self, Self::Plain)
    }

    /// Whether the TLS layer requires x509 chain validation (as opposed
    /// to anonymous-DH-style "encrypt without a trust decision").
    pub fn uses_x509(&self) -> bool {
        matches!(self, Self::X509None | Self::X509Vnc | Self::X509Plain | Self::X509Sasl)
    }
}

impl fmt::Display for SecurityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ── Pixel Format ────────────────────────────────────────────────────────

/// RFB pixel format descriptor (§7.4).
/// Describes how pixels are encoded in framebuffer pixel data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelFormat {
    /// Bits per pixel (8, 16, or 32).
    pub bits_per_pixel: u8,
    /// Number of useful bits in each pixel value.
    pub depth: u8,
    /// Non-zero = most significant byte first.
    pub big_endian: bool,
    /// Non-zero = true colour (as opposed to colour-map).
    pub true_colour: bool,
    /// Maximum value for red in true colour mode.
    pub red_max: u16,
    /// Maximum value for green in true colour mode.
    pub green_max: u16,
    /// Maximum value for blue in true colour mode.
    pub blue_max: u16,
    /// Bit shift for red channel.
    pub red_shift: u8,
    /// Bit shift for green channel.
    pub green_shift: u8,
    /// Bit shift for blue channel.
    pub blue_shift: u8,
}

impl PixelFormat {
    /// Standard 32-bit RGBA pixel format.
    pub fn rgba32() -> Self {
        Self {
            bits_per_pixel: 32,
            depth: 24,
            big_endian: false,
            true_colour: true,
            red_max: 255,
            green_max: 255,
            blue_max: 255,
            red_shift: 16,
            green_shift: 8,
            blue_shift: 0,
        }
    }

    /// Standard 16-bit RGB565 format.
    pub fn rgb565() -> Self {
        Self {
            bits_per_pixel: 16,
            depth: 16,
            big_endian: false,
            true_colour: true,
            red_max: 31,
            green_max: 63,
            blue_max: 31,
            red_shift: 11,
            green_shift: 5,
            blue_shift: 0,
        }
    }

    /// 8-bit indexed colour (colour map).
    pub fn indexed8() -> Self {
        Self {
            bits_per_pixel: 8,
            depth: 8,
            big_endian: false,
            true_colour: false,
            red_max: 7,
            green_max: 7,
            blue_max: 3,
            red_shift: 0,
            green_shift: 3,
            blue_shift: 6,
        }
    }

    /// Serialize to the 16-byte wire format.
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[0] = self.bits_per_pixel;
        buf[1] = self.depth;
        buf[2] = if self.big_endian { 1 } else { 0 };
        buf[3] = if self.true_colour { 1 } else { 0 };
        buf[4] = (self.red_max >> 8) as u8;
        buf[5] = (self.red_max & 0xFF) as u8;
        buf[6] = (self.green_max >> 8) as u8;
        buf[7] = (self.green_max & 0xFF) as u8;
        buf[8] = (self.blue_max >> 8) as u8;
        buf[9] = (self.blue_max & 0xFF) as u8;
        buf[10] = self.red_shift;
        buf[11] = self.green_shift;
        buf[12] = self.blue_shift;
        // 13..16 = padding
        buf
    }

    /// Parse from the 16-byte wire format.
    pub fn from_bytes(buf: &[u8; 16]) -> Self {
        Self {
            bits_per_pixel: buf[0],
            depth: buf[1],
            big_endian: buf[2] != 0,
            true_colour: buf[3] != 0,
            red_max: (buf[4] as u16) << 8 | buf[5] as u16,
            green_max: (buf[6] as u16) << 8 | buf[7] as u16,
            blue_max: (buf[8] as u16) << 8 | buf[9] as u16,
            red_shift: buf[10],
            green_shift: buf[11],
            blue_shift: buf[12],
        }
    }

    /// Bytes per pixel (1, 2, or 4).
    pub fn bytes_per_pixel(&self) -> usize {
        (self.bits_per_pixel as usize + 7) / 8
    }
}

impl Default for PixelFormat {
    fn default() -> Self {
        Self::rgba32()
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.true_colour {
            write!(
                f,
                "{}bpp depth={} R:{}/{}  G:{}/{}  B:{}/{} {}",
                self.bits_per_pixel,
                self.depth,
                self.red_max,
                self.red_shift,
                self.green_max,
                self.green_shift,
                self.blue_max,
                self.blue_shift,
                if self.big_endian { "BE" } else { "LE" }
            )
        } else {
            write!(f, "{}bpp indexed colour", self.bits_per_pixel)
        }
    }
}

// ── Encoding Types ──────────────────────────────────────────────────────

/// RFB encoding types (§7.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EncodingType {
    /// Raw pixel data.
    Raw,
    /// Copy rectangle from another area.
    CopyRect,
    /// RRE — Rise and Run length Encoding.
    RRE,
    /// Hextile — tiled encoding.
    Hextile,
    /// TRLE — Tight Run-Length Encoding.
    TRLE,
    /// ZRLE — Zlib compressed TRLE.
    ZRLE,
    /// Tight — TightVNC encoding.
    Tight,
    /// RichCursor pseudo-encoding: server-rendered cursor with RGBA+mask.
    RichCursor,
    /// XCursor pseudo-encoding: two-colour cursor with bitmap+mask.
    XCursor,
    /// DesktopSize pseudo-encoding.
    DesktopSizePseudo,
    /// ContinuousUpdates pseudo-encoding.
    ContinuousUpdatesPseudo,
    /// LastRect pseudo-encoding.
    LastRectPseudo,
    /// Extended desktop size.
    ExtendedDesktopSizePseudo,
    /// PointerChange pseudo-encoding: toggles absolute pointer mode.
    PointerChangePseudo,
    /// LED state pseudo-encoding.
    LedStatePseudo,
    /// WMVi: a fresh PixelFormat pushed mid-session.
    PixelFormatChangePseudo,
    /// Extended key event capability pseudo-encoding.
    ExtendedKeyEventPseudo,
    /// QEMU audio capability pseudo-encoding.
    AudioPseudo,
    /// Unknown / custom encoding.
    Other(i32),
}

impl EncodingType {
    /// Encoding type as a signed 32-bit integer for the wire.
    pub fn to_i32(&self) -> i32 {
        match self {
            Self::Raw => 0,
            Self::CopyRect => 1,
            Self::RRE => 2,
            Self::Hextile => 5,
            Self::TRLE => 15,
            Self::ZRLE => 16,
            Self::Tight => 7,
            Self::RichCursor => -239,
            Self::XCursor => -240,
            Self::DesktopSizePseudo => -223,
            Self::ContinuousUpdatesPseudo => -313,
            Self::LastRectPseudo => -224,
            Self::ExtendedDesktopSizePseudo => -308,
            Self::PointerChangePseudo => -257,
            Self::LedStatePseudo => -261,
            Self::PixelFormatChangePseudo => 0x574D_5669,
            Self::ExtendedKeyEventPseudo => -258,
            Self::AudioPseudo => -259,
            Self::Other(v) => *v,
        }
    }

    /// Parse from a signed 32-bit integer.
    pub fn from_i32(v: i32) -> Self {
        match v {
            0 => Self::Raw,
            1 => Self::CopyRect,
            2 => Self::RRE,
            5 => Self::Hextile,
            15 => Self::TRLE,
            16 => Self::ZRLE,
            7 => Self::Tight,
            -239 => Self::RichCursor,
            -240 => Self::XCursor,
            -223 => Self::DesktopSizePseudo,
            -313 => Self::ContinuousUpdatesPseudo,
            -224 => Self::LastRectPseudo,
            -308 => Self::ExtendedDesktopSizePseudo,
            -257 => Self::PointerChangePseudo,
            -261 => Self::LedStatePseudo,
            0x574D_5669 => Self::PixelFormatChangePseudo,
            -258 => Self::ExtendedKeyEventPseudo,
            -259 => Self::AudioPseudo,
            other => Self::Other(other),
        }
    }

    pub fn name(&self) -> String {
        match self {
            Self::Raw => "Raw".into(),
            Self::CopyRect => "CopyRect".into(),
            Self::RRE => "RRE".into(),
            Self::Hextile => "Hextile".into(),
            Self::TRLE => "TRLE".into(),
            Self::ZRLE => "ZRLE".into(),
            Self::Tight => "Tight".into(),
            Self::RichCursor => "RichCursor (pseudo)".into(),
            Self::XCursor => "XCursor (pseudo)".into(),
            Self::DesktopSizePseudo => "DesktopSize (pseudo)".into(),
            Self::ContinuousUpdatesPseudo => "ContinuousUpdates (pseudo)".into(),
            Self::LastRectPseudo => "LastRect (pseudo)".into(),
            Self::ExtendedDesktopSizePseudo => "ExtendedDesktopSize (pseudo)".into(),
            Self::PointerChangePseudo => "PointerChange (pseudo)".into(),
            Self::LedStatePseudo => "LedState (pseudo)".into(),
            Self::PixelFormatChangePseudo => "WMVi/PixelFormatChange (pseudo)".into(),
            Self::ExtendedKeyEventPseudo => "ExtendedKeyEvent (pseudo)".into(),
            Self::AudioPseudo => "Audio (pseudo)".into(),
            Self::Other(v) => format!("Unknown({})", v),
        }
    }
}

// ── Client → Server Message Types ───────────────────────────────────────

/// Client-to-server message type codes (§7.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientMessageType {
    SetPixelFormat = 0,
    SetEncodings = 2,
    FramebufferUpdateRequest = 3,
    KeyEvent = 4,
    PointerEvent = 5,
    ClientCutText = 6,
    /// QEMU extension message (audio sub-messages live under this type).
    QemuClientMessage = 255,
}

/// QEMU audio extension client sub-message ids, carried under
/// [`ClientMessageType::QemuClientMessage`] submessage type 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum QemuAudioSubMessage {
    Enable = 0,
    Disable = 1,
    SetFormat = 2,
}

// ── Server → Client Message Types ───────────────────────────────────────

/// Server-to-client message type codes (§7.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerMessageType {
    FramebufferUpdate = 0,
    SetColourMapEntries = 1,
    Bell = 2,
    ServerCutText = 3,
    /// QEMU extension message (audio data arrives under this type).
    QemuServerMessage = 255,
}

impl ServerMessageType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::FramebufferUpdate),
            1 => Some(Self::SetColourMapEntries),
            2 => Some(Self::Bell),
            3 => Some(Self::ServerCutText),
            255 => Some(Self::QemuServerMessage),
            _ => None,
        }
    }
}

// ── Key Event Symbols (X11 keysym subset) ───────────────────────────────

/// Common X11 keysym values used in VNC key events.
pub mod keysym {
    pub const BACKSPACE: u32 = 0xFF08;
    pub const TAB: u32 = 0xFF09;
    pub const RETURN: u32 = 0xFF0D;
    pub const ESCAPE: u32 = 0xFF1B;
    pub const INSERT: u32 = 0xFF63;
    pub const DELETE: u32 = 0xFFFF;
    pub const HOME: u32 = 0xFF50;
    pub const END: u32 = 0xFF57;
    pub const PAGE_UP: u32 = 0xFF55;
    pub const PAGE_DOWN: u32 = 0xFF56;
    pub const LEFT: u32 = 0xFF51;
    pub const UP: u32 = 0xFF52;
    pub const RIGHT: u32 = 0xFF53;
    pub const DOWN: u32 = 0xFF54;
    pub const F1: u32 = 0xFFBE;
    pub const F2: u32 = 0xFFBF;
    pub const F3: u32 = 0xFFC0;
    pub const F4: u32 = 0xFFC1;
    pub const F5: u32 = 0xFFC2;
    pub const F6: u32 = 0xFFC3;
    pub const F7: u32 = 0xFFC4;
    pub const F8: u32 = 0xFFC5;
    pub const F9: u32 = 0xFFC6;
    pub const F10: u32 = 0xFFC7;
    pub const F11: u32 = 0xFFC8;
    pub const F12: u32 = 0xFFC9;
    pub const SHIFT_L: u32 = 0xFFE1;
    pub const SHIFT_R: u32 = 0xFFE2;
    pub const CONTROL_L: u32 = 0xFFE3;
    pub const CONTROL_R: u32 = 0xFFE4;
    pub const META_L: u32 = 0xFFE7;
    pub const META_R: u32 = 0xFFE8;
    pub const ALT_L: u32 = 0xFFE9;
    pub const ALT_R: u32 = 0xFFEA;
    pub const SUPER_L: u32 = 0xFFEB;
    pub const SUPER_R: u32 = 0xFFEC;
    pub const CAPS_LOCK: u32 = 0xFFE5;
    pub const NUM_LOCK: u32 = 0xFF7F;
    pub const SCROLL_LOCK: u32 = 0xFF14;
}

// ── Mouse Button Mask ───────────────────────────────────────────────────

/// Mouse button mask bits for VNC pointer events.
pub mod mouse_button {
    pub const LEFT: u8 = 1;
    pub const MIDDLE: u8 = 2;
    pub const RIGHT: u8 = 4;
    pub const SCROLL_UP: u8 = 8;
    pub const SCROLL_DOWN: u8 = 16;
}

// ── Configuration ───────────────────────────────────────────────────────

/// Configuration for a new VNC connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VncConfig {
    /// Target host.
    pub host: String,
    /// Target port (default 5900).
    #[serde(default = "default_vnc_port")]
    pub port: u16,
    /// VNC password (used with VNC Authentication security type).
    pub password: Option<String>,
    /// Username (some servers support this with VeNCrypt or Tight).
    pub username: Option<String>,
    /// Preferred pixel format (None = use server default).
    pub pixel_format: Option<PixelFormat>,
    /// Preferred encodings, most desired first.
    #[serde(default = "default_encodings")]
    pub encodings: Vec<String>,
    /// Request shared desktop (allow other clients).
    #[serde(default = "default_true")]
    pub shared: bool,
    /// View-only mode — no keyboard/mouse events will be sent.
    #[serde(default)]
    pub view_only: bool,
    /// TCP connect timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Framebuffer update request interval (ms).
    #[serde(default = "default_update_interval")]
    pub update_interval_ms: u64,
    /// Whether to request local cursor rendering via pseudo-encoding.
    #[serde(default = "default_true")]
    pub local_cursor: bool,
    /// Show the server desktop name in the session info.
    #[serde(default = "default_true")]
    pub show_desktop_name: bool,
    /// Connection label / friendly name.
    pub label: Option<String>,
    /// JPEG quality (1-9) for Tight encoding, 0 = lossless. Ignored if Tight isn't used.
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    /// Compression level (0-9) for Tight or ZRLE.
    #[serde(default = "default_compression")]
    pub compression_level: u8,
    /// Keep-alive interval in seconds (0 = disabled, sends FramebufferUpdateRequest).
    #[serde(default)]
    pub keepalive_interval_secs: u64,
    /// x509 credentials for VeNCrypt `X509*` subauths and the legacy TLS
    /// auth type's CLIENTNAME subtype.
    #[serde(default)]
    pub x509: X509Credentials,
}

/// x509 material for the TLS/VeNCrypt certificate-validated subauths.
/// Paths are resolved relative to the CA/CRL/cert/key discovery search
/// order in §4.5.1 when left unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct X509Credentials {
    pub ca_cert_path: Option<String>,
    pub ca_crl_path: Option<String>,
    pub client_cert_path: Option<String>,
    pub client_key_path: Option<String>,
}

fn default_vnc_port() -> u16 { 5900 }
fn default_true() -> bool { true }
fn default_connect_timeout() -> u64 { 15 }
fn default_update_interval() -> u64 { 33 } // ~30 fps
fn default_jpeg_quality() -> u8 { 6 }
fn default_compression() -> u8 { 2 }
fn default_encodings() -> Vec<String> {
    vec![
        "ZRLE".into(),
        "Tight".into(),
        "Hextile".into(),
        "CopyRect".into(),
        "Raw".into(),
    ]
}

impl Default for VncConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_vnc_port(),
            password: None,
            username: None,
            pixel_format: None,
            encodings: default_encodings(),
            shared: true,
            view_only: false,
            connect_timeout_secs: default_connect_timeout(),
            update_interval_ms: default_update_interval(),
            local_cursor: true,
            show_desktop_name: true,
            label: None,
            jpeg_quality: default_jpeg_quality(),
            compression_level: default_compression(),
            keepalive_interval_secs: 0,
            x509: X509Credentials::default(),
        }
    }
}

// ── Session metadata ────────────────────────────────────────────────────

/// Metadata about a live (or recently closed) VNC session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VncSession {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub connected: bool,
    pub username: Option<String>,
    pub label: Option<String>,
    /// Negotiated RFB protocol version string (e.g. "3.8").
    pub protocol_version: Option<String>,
    /// Security type used.
    pub security_type: Option<String>,
    /// Server desktop name.
    pub server_name: Option<String>,
    /// Framebuffer width in pixels.
    pub framebuffer_width: u16,
    /// Framebuffer height in pixels.
    pub framebuffer_height: u16,
    /// Current pixel format description string.
    pub pixel_format: String,
    /// ISO-8601 when session was created.
    pub connected_at: String,
    /// ISO-8601 of last activity.
    pub last_activity: String,
    /// Total framebuffer update messages received.
    pub frame_count: u64,
    /// Total bytes received.
    pub bytes_received: u64,
    /// Total bytes sent.
    pub bytes_sent: u64,
    /// View-only mode indicator.
    pub view_only: bool,
}

impl VncSession {
    pub fn from_config(id: String, config: &VncConfig) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id,
            host: config.host.clone(),
            port: config.port,
            connected: true,
            username: config.username.clone(),
            label: config.label.clone(),
            protocol_version: None,
            security_type: None,
            server_name: None,
            framebuffer_width: 0,
            framebuffer_height: 0,
            pixel_format: String::new(),
            connected_at: now.clone(),
            last_activity: now,
            frame_count: 0,
            bytes_received: 0,
            bytes_sent: 0,
            view_only: config.view_only,
        }
    }
}

// ── Events emitted to the frontend ──────────────────────────────────────

/// Session state change event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VncStateEvent {
    pub session_id: String,
    pub state: String,
    pub message: String,
}

/// Desktop resize event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VncResizeEvent {
    pub session_id: String,
    pub width: u16,
    pub height: u16,
}

// ── Session statistics ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VncStats {
    pub session_id: String,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub frame_count: u64,
    pub connected_at: String,
    pub last_activity: String,
    pub uptime_secs: u64,
    pub framebuffer_width: u16,
    pub framebuffer_height: u16,
    pub pixel_format: String,
    pub encoding: String,
}
