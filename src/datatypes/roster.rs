// ABOUTME: Snapshot of reserved names sent during the username stage of the handshake
// ABOUTME: Framed as newline-joined UTF-8; names never contain whitespace

use bytes::Bytes;

/// Character used to mask hidden users' names, repeated to the name's length.
pub const MASK_CHAR: char = '*';

/// Encode a name snapshot for the wire.
pub fn encode(names: &[String]) -> Bytes {
    Bytes::from(names.join("\n"))
}

/// Decode a name snapshot received during authentication.
pub fn decode(payload: &[u8]) -> crate::Result<Vec<String>> {
    let text = std::str::from_utf8(payload)?;
    if text.is_empty() {
        return Ok(Vec::new());
    }
    Ok(text.split('\n').map(str::to_string).collect())
}

/// Replace a name with a mask of the same length.
pub fn mask(name: &str) -> String {
    MASK_CHAR.to_string().repeat(name.chars().count())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_a_snapshot() {
        let names = vec!["SYSTEM".to_string(), "ALICE".to_string(), "***".to_string()];
        let decoded = decode(&encode(&names)).unwrap();
        assert_eq!(decoded, names);
    }

    #[test]
    fn empty_snapshot_is_empty_payload() {
        assert!(encode(&[]).is_empty());
        assert!(decode(b"").unwrap().is_empty());
    }

    #[test]
    fn mask_matches_name_length() {
        assert_eq!(mask("ALICE"), "*****");
    }
}
