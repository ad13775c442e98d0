//! Line Protocol Codec
//!
//! Encodes outbound commands and decodes inbound responses for the rig's ASCII
//! command/response protocol.
//!
//! Protocol Overview:
//! - Format: colon-separated tokens, one exchange per request
//! - Terminator: LF (`\n`); a trailing CR from the device is tolerated
//! - Command: `COMMAND[:PARAM]*`
//! - Measurement reply: `RESULT:<value>:<units>:<PASS|FAIL>`
//! - Calibration reply: any line containing `CAL_OK`
//! - Status reply: `STATUS:<STATE>:<OK|ERR>`
//!
//! Decoding is pure: the same bytes always yield the same value or the same error.
//!
//! # Example
//!
//! ```
//! use mechatest::protocol::{decode_measurement, Command, Verdict};
//!
//! let cmd = Command::test("D1", ["voltage", "5.0"]);
//! assert_eq!(cmd.encode(), b"TEST:D1:voltage:5.0\n");
//!
//! let m = decode_measurement(b"RESULT:4.98:V:PASS\r\n").unwrap();
//! assert_eq!(m.value, 4.98);
//! assert_eq!(m.unit, "V");
//! assert_eq!(m.verdict, Verdict::Pass);
//! ```

use std::fmt;
use thiserror::Error;

/// Frame delimiter for both directions.
pub const LINE_TERMINATOR: u8 = b'\n';

/// Token separator.
pub const SEPARATOR: char = ':';

/// Token that marks a successful calibration anywhere in the response line.
pub const CALIBRATION_OK: &str = "CAL_OK";

const RESULT_TAG: &str = "RESULT";
const STATUS_TAG: &str = "STATUS";

/// A command could not be framed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("empty command name")]
    EmptyName,

    #[error("token '{0}' contains a separator or line break")]
    InvalidToken(String),
}

/// A response could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Nothing was received (timeout or blank line).
    #[error("no response")]
    Empty,

    /// Something was received but it does not have the expected shape.
    #[error("invalid response format: {raw} ({reason})")]
    Malformed { raw: String, reason: String },
}

impl DecodeError {
    fn malformed(raw: &str, reason: impl Into<String>) -> Self {
        DecodeError::Malformed {
            raw: raw.to_string(),
            reason: reason.into(),
        }
    }
}

/// Outbound command: a name plus ordered parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: String,
    params: Vec<String>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    /// Append one parameter.
    pub fn param(mut self, param: impl Into<String>) -> Self {
        self.params.push(param.into());
        self
    }

    /// Append several parameters in order.
    pub fn params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params.extend(params.into_iter().map(Into::into));
        self
    }

    /// `TEST:<device>[:<param>]*`
    pub fn test<I, S>(device_id: &str, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new("TEST").param(device_id).params(params)
    }

    /// `CALIBRATE`
    pub fn calibrate() -> Self {
        Self::new("CALIBRATE")
    }

    /// `STATUS`
    pub fn status() -> Self {
        Self::new(STATUS_TAG)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check that every token can be framed without ambiguity.
    pub fn validate(&self) -> Result<(), EncodeError> {
        if self.name.is_empty() {
            return Err(EncodeError::EmptyName);
        }
        let bad = |t: &String| t.contains(SEPARATOR) || t.contains('\n') || t.contains('\r');
        if let Some(token) = std::iter::once(&self.name).chain(&self.params).find(|t| bad(t)) {
            return Err(EncodeError::InvalidToken(token.clone()));
        }
        Ok(())
    }

    /// Serialize to wire bytes, including the line terminator.
    pub fn encode(&self) -> Vec<u8> {
        let mut line = self.to_string().into_bytes();
        line.push(LINE_TERMINATOR);
        line
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for p in &self.params {
            write!(f, "{}{}", SEPARATOR, p)?;
        }
        Ok(())
    }
}

/// Device-side verdict on a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail,
}

/// Decoded `RESULT` reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub value: f64,
    pub unit: String,
    pub verdict: Verdict,
}

impl Measurement {
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }
}

/// Decoded `STATUS` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatus {
    /// Device-reported state token, verbatim.
    pub state: String,
    /// `true` for `OK`, `false` for `ERR`.
    pub ok: bool,
}

fn frame_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

/// Decode `RESULT:<value>:<units>:<PASS|FAIL>`.
///
/// Extra trailing tokens are ignored. A verdict token other than `PASS` is a fail.
pub fn decode_measurement(bytes: &[u8]) -> Result<Measurement, DecodeError> {
    let text = frame_text(bytes);
    if text.is_empty() {
        return Err(DecodeError::Empty);
    }

    let tokens: Vec<&str> = text.split(SEPARATOR).collect();
    if tokens.len() < 4 {
        return Err(DecodeError::malformed(
            &text,
            format!("expected at least 4 tokens, got {}", tokens.len()),
        ));
    }
    if tokens[0] != RESULT_TAG {
        return Err(DecodeError::malformed(
            &text,
            format!("expected '{}' tag", RESULT_TAG),
        ));
    }

    let value: f64 = tokens[1]
        .trim()
        .parse()
        .map_err(|_| DecodeError::malformed(&text, format!("non-numeric value '{}'", tokens[1])))?;
    if !value.is_finite() {
        return Err(DecodeError::malformed(&text, "value is not finite"));
    }

    let verdict = if tokens[3].trim() == "PASS" {
        Verdict::Pass
    } else {
        Verdict::Fail
    };

    Ok(Measurement {
        value,
        unit: tokens[2].trim().to_string(),
        verdict,
    })
}

/// `true` when the reply carries the calibration success token.
pub fn is_calibration_ok(bytes: &[u8]) -> bool {
    String::from_utf8_lossy(bytes).contains(CALIBRATION_OK)
}

/// Decode `STATUS:<STATE>:<OK|ERR>`.
pub fn decode_status(bytes: &[u8]) -> Result<DeviceStatus, DecodeError> {
    let text = frame_text(bytes);
    if text.is_empty() {
        return Err(DecodeError::Empty);
    }

    let tokens: Vec<&str> = text.split(SEPARATOR).collect();
    match tokens.as_slice() {
        [STATUS_TAG, state, health, ..] if !state.is_empty() => {
            let ok = match *health {
                "OK" => true,
                "ERR" => false,
                other => {
                    return Err(DecodeError::malformed(
                        &text,
                        format!("unknown health token '{}'", other),
                    ))
                }
            };
            Ok(DeviceStatus {
                state: state.to_string(),
                ok,
            })
        }
        _ => Err(DecodeError::malformed(&text, "expected STATUS:<STATE>:<OK|ERR>")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_encoding() {
        assert_eq!(Command::calibrate().encode(), b"CALIBRATE\n");
        assert_eq!(Command::status().to_string(), "STATUS");
        assert_eq!(
            Command::test("D1", Vec::<String>::new()).to_string(),
            "TEST:D1"
        );
        assert_eq!(
            Command::test("D1", ["voltage", "5.0", "current", "0.1"]).to_string(),
            "TEST:D1:voltage:5.0:current:0.1"
        );
    }

    #[test]
    fn test_command_validation() {
        assert!(Command::test("D1", ["voltage"]).validate().is_ok());
        assert_eq!(
            Command::test("D1", ["a:b"]).validate(),
            Err(EncodeError::InvalidToken("a:b".into()))
        );
        assert!(Command::test("D1\n", Vec::<String>::new()).validate().is_err());
        assert_eq!(Command::new("").validate(), Err(EncodeError::EmptyName));
    }

    #[test]
    fn test_decode_measurement() {
        let m = decode_measurement(b"RESULT:4.98:V:PASS").unwrap();
        assert_eq!(m.value, 4.98);
        assert_eq!(m.unit, "V");
        assert!(m.passed());

        let m = decode_measurement(b"RESULT:-1.5e-3:A:FAIL\r\n").unwrap();
        assert_eq!(m.value, -1.5e-3);
        assert_eq!(m.verdict, Verdict::Fail);

        // Extra tokens are tolerated
        let m = decode_measurement(b"RESULT:10:Ohm:PASS:extra").unwrap();
        assert_eq!(m.unit, "Ohm");
    }

    #[test]
    fn test_decode_measurement_failures() {
        assert_eq!(decode_measurement(b""), Err(DecodeError::Empty));
        assert_eq!(decode_measurement(b"  \r\n"), Err(DecodeError::Empty));

        match decode_measurement(b"RESULT:abc:V") {
            Err(DecodeError::Malformed { raw, .. }) => assert_eq!(raw, "RESULT:abc:V"),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(matches!(
            decode_measurement(b"RESULT:abc:V:PASS"),
            Err(DecodeError::Malformed { .. })
        ));
        assert!(matches!(
            decode_measurement(b"ERROR:1.0:V:PASS"),
            Err(DecodeError::Malformed { .. })
        ));
        assert!(matches!(
            decode_measurement(b"RESULT:NaN:V:PASS"),
            Err(DecodeError::Malformed { .. })
        ));
    }

    #[test]
    fn test_decoding_is_deterministic() {
        let inputs: [&[u8]; 3] = [b"RESULT:1:V:PASS", b"RESULT:x:V", b""];
        for input in inputs {
            assert_eq!(decode_measurement(input), decode_measurement(input));
        }
    }

    #[test]
    fn test_calibration_token() {
        assert!(is_calibration_ok(b"CAL_OK"));
        assert!(is_calibration_ok(b"CALIBRATION:CAL_OK:2.0s"));
        assert!(!is_calibration_ok(b"CAL_FAIL"));
        assert!(!is_calibration_ok(b""));
    }

    #[test]
    fn test_decode_status() {
        let s = decode_status(b"STATUS:READY:OK\n").unwrap();
        assert_eq!(s.state, "READY");
        assert!(s.ok);

        let s = decode_status(b"STATUS:OVERTEMP:ERR").unwrap();
        assert!(!s.ok);

        assert_eq!(decode_status(b""), Err(DecodeError::Empty));
        assert!(decode_status(b"STATUS:READY").is_err());
        assert!(decode_status(b"STATUS:READY:MAYBE").is_err());
        assert!(decode_status(b"RESULT:1:V:PASS").is_err());
    }
}
