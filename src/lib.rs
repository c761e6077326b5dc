//! # rfb-client – RFB/VNC protocol engine
//!
//! Client-side RFB/VNC protocol engine: version/security handshake, layered
//! authentication (VNC DES, MSLogon, Apple Remote Desktop, TLS/VeNCrypt,
//! SASL), framebuffer update decoders (Raw, CopyRect, RRE, Hextile, ZRLE,
//! Tight), pseudo-encodings, and client-to-server input/clipboard messaging.

pub mod vnc;
