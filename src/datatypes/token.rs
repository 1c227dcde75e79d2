// ABOUTME: The PASS/FAIL acknowledgement tokens exchanged inside frame payloads
// ABOUTME: Anything else where a token is expected is fatal to the running exchange

use crate::frame::Frame;
use thiserror::Error;

/// String-valued acknowledgement carried as an ordinary frame payload, so
/// that a peer rendering every frame as text stays well-behaved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Token {
    Pass,
    Fail,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("unexpected response received for pass: {0:?}")]
    Unexpected(String),

    #[error("corrupt data checked for pass")]
    Corrupt,
}

impl Token {
    pub fn as_str(self) -> &'static str {
        match self {
            Token::Pass => "PASS",
            Token::Fail => "FAIL",
        }
    }

    /// Interpret a payload as an acknowledgement token.
    pub fn parse(payload: &[u8]) -> Result<Token, TokenError> {
        let text = std::str::from_utf8(payload).map_err(|_| TokenError::Corrupt)?;
        match text {
            "PASS" => Ok(Token::Pass),
            "FAIL" => Ok(Token::Fail),
            other => Err(TokenError::Unexpected(other.to_string())),
        }
    }

    pub fn from_frame(frame: &Frame) -> Result<Token, TokenError> {
        Token::parse(&frame.payload)
    }

    pub fn is_pass(self) -> bool {
        self == Token::Pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_tokens() {
        assert_eq!(Token::parse(b"PASS").unwrap(), Token::Pass);
        assert_eq!(Token::parse(b"FAIL").unwrap(), Token::Fail);
    }

    #[test]
    fn rejects_other_payloads() {
        assert!(matches!(
            Token::parse(b"pass"),
            Err(TokenError::Unexpected(_))
        ));
        assert!(matches!(Token::parse(b"OK"), Err(TokenError::Unexpected(_))));
    }

    #[test]
    fn rejects_non_utf8() {
        assert!(matches!(Token::parse(&[0xff, 0xfe]), Err(TokenError::Corrupt)));
    }
}
