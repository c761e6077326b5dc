//! Security type negotiation and the per-type authentication handlers.

pub mod ard;
pub mod mslogon;
pub mod sasl;
pub mod tls;
pub mod vnc_des;

use crate::vnc::error::VncError;
use crate::vnc::types::SecurityType;

/// Select the best available security type from the server's offered
/// list, preferring the strongest authentication this engine supports.
pub fn select_security_type(types: &[SecurityType]) -> Option<SecurityType> {
    let preference = [
        SecurityType::VeNCrypt,
        SecurityType::Sasl,
        SecurityType::AppleRemoteDesktop,
        SecurityType::MsLogon,
        SecurityType::Tls,
        SecurityType::VncAuthentication,
        SecurityType::Tight,
        SecurityType::None,
    ];

    for candidate in &preference {
        if types.contains(candidate) {
            return Some(*candidate);
        }
    }

    types.first().copied()
}

/// Build the security type selection message (client → server, one byte).
pub fn build_security_type_selection(security_type: &SecurityType) -> Vec<u8> {
    vec![security_type.to_byte()]
}

/// Parse the SecurityResult message (RFB 3.8+). `Ok(())` = success.
pub fn parse_security_result(data: &[u8]) -> Result<(), VncError> {
    if data.len() < 4 {
        return Err(VncError::protocol("SecurityResult too short"));
    }
    let status = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    match status {
        0 => Ok(()),
        1 => {
            let reason = if data.len() >= 8 {
                let reason_len = u32::from_be_bytes([data[4], data[5], data[6], data[7]]) as usize;
                if data.len() >= 8 + reason_len {
                    Some(String::from_utf8_lossy(&data[8..8 + reason_len]).into_owned())
                } else {
                    None
                }
            } else {
                None
            };
            Err(VncError::AuthFailed(reason))
        }
        _ => Err(VncError::AuthFailed(Some(format!("unexpected security result code {status}")))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_vencrypt_over_everything() {
        let types = vec![SecurityType::None, SecurityType::VncAuthentication, SecurityType::VeNCrypt];
        assert_eq!(select_security_type(&types), Some(SecurityType::VeNCrypt));
    }

    #[test]
    fn falls_back_to_vnc_auth_over_none() {
        let types = vec![SecurityType::None, SecurityType::VncAuthentication];
        assert_eq!(select_security_type(&types), Some(SecurityType::VncAuthentication));
    }

    #[test]
    fn empty_list_selects_nothing() {
        assert_eq!(select_security_type(&[]), None);
    }

    #[test]
    fn unrecognized_types_fall_back_to_first() {
        let types = vec![SecurityType::Other(99)];
        assert_eq!(select_security_type(&types), Some(SecurityType::Other(99)));
    }

    #[test]
    fn build_selection_message() {
        assert_eq!(build_security_type_selection(&SecurityType::VncAuthentication), vec![2]);
    }

    #[test]
    fn parse_security_result_ok() {
        assert!(parse_security_result(&0u32.to_be_bytes()).is_ok());
    }

    #[test]
    fn parse_security_result_failed_with_reason() {
        let mut data = Vec::new();
        data.extend_from_slice(&1u32.to_be_bytes());
        let reason = b"bad password";
        data.extend_from_slice(&(reason.len() as u32).to_be_bytes());
        data.extend_from_slice(reason);
        match parse_security_result(&data) {
            Err(VncError::AuthFailed(Some(msg))) => assert_eq!(msg, "bad password"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parse_security_result_too_short() {
        assert!(parse_security_result(&[0, 0]).is_err());
    }
}
