//! Sensor line protocol.
//!
//! One request per connection. The client sends `GET_TRAFFIC\n` and the
//! sensor answers with a single line:
//!
//! ```text
//! TRAFFIC=<int>;PRIORITY=<true|false>
//! TRAFFIC=-1;PRIORITY=false        (sensor could not reach the engine)
//! ERROR=UnknownRequest             (anything else was sent)
//! ```

use thiserror::Error;

pub const GET_TRAFFIC: &str = "GET_TRAFFIC";

/// Traffic value reported when the sensor's last engine query failed.
pub const FAILURE_SENTINEL: i64 = -1;

/// Upper bound on a single protocol line, requests and replies alike.
pub const MAX_LINE_BYTES: usize = 1024;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty reply")]
    Empty,

    #[error("unrecognized reply: {0}")]
    Unrecognized(String),

    #[error("bad traffic value: {0}")]
    BadTraffic(String),

    #[error("bad priority value: {0}")]
    BadPriority(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorRequest {
    GetTraffic,
    Unknown,
}

impl SensorRequest {
    pub fn parse(line: &str) -> Self {
        if line.trim() == GET_TRAFFIC {
            SensorRequest::GetTraffic
        } else {
            SensorRequest::Unknown
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorResponse {
    /// A reading. `traffic` is signed so that out-of-range values from a
    /// misbehaving sensor survive decoding and can be judged by the caller.
    Reading { traffic: i64, priority: bool },
    /// The sensor is alive but has no fresh ground truth.
    Failure,
    UnknownRequest,
}

impl SensorResponse {
    pub fn reading(traffic: u32, priority: bool) -> Self {
        SensorResponse::Reading {
            traffic: traffic as i64,
            priority,
        }
    }

    /// Wire form, newline terminated.
    pub fn encode(&self) -> String {
        match self {
            SensorResponse::Reading { traffic, priority } => {
                format!("TRAFFIC={};PRIORITY={}\n", traffic, priority)
            }
            SensorResponse::Failure => {
                format!("TRAFFIC={};PRIORITY=false\n", FAILURE_SENTINEL)
            }
            SensorResponse::UnknownRequest => "ERROR=UnknownRequest\n".to_string(),
        }
    }

    /// Decode one reply line. A missing `PRIORITY` field reads as `false`.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ProtocolError::Empty);
        }
        if line == "ERROR=UnknownRequest" {
            return Ok(SensorResponse::UnknownRequest);
        }

        let mut traffic = None;
        let mut priority = false;
        for field in line.split(';') {
            let Some((key, value)) = field.split_once('=') else {
                return Err(ProtocolError::Unrecognized(line.to_string()));
            };
            match key.trim() {
                "TRAFFIC" => {
                    let parsed: i64 = value
                        .trim()
                        .parse()
                        .map_err(|_| ProtocolError::BadTraffic(value.to_string()))?;
                    traffic = Some(parsed);
                }
                "PRIORITY" => {
                    priority = match value.trim().to_ascii_lowercase().as_str() {
                        "true" => true,
                        "false" => false,
                        _ => return Err(ProtocolError::BadPriority(value.to_string())),
                    };
                }
                _ => return Err(ProtocolError::Unrecognized(line.to_string())),
            }
        }

        match traffic {
            Some(FAILURE_SENTINEL) => Ok(SensorResponse::Failure),
            Some(traffic) => Ok(SensorResponse::Reading { traffic, priority }),
            None => Err(ProtocolError::Unrecognized(line.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_parsing() {
        assert_eq!(SensorRequest::parse("GET_TRAFFIC\n"), SensorRequest::GetTraffic);
        assert_eq!(SensorRequest::parse("  GET_TRAFFIC "), SensorRequest::GetTraffic);
        assert_eq!(SensorRequest::parse("GET_SPEED"), SensorRequest::Unknown);
        assert_eq!(SensorRequest::parse(""), SensorRequest::Unknown);
    }

    #[test]
    fn encodes_wire_lines() {
        assert_eq!(
            SensorResponse::reading(12, true).encode(),
            "TRAFFIC=12;PRIORITY=true\n"
        );
        assert_eq!(SensorResponse::Failure.encode(), "TRAFFIC=-1;PRIORITY=false\n");
        assert_eq!(
            SensorResponse::UnknownRequest.encode(),
            "ERROR=UnknownRequest\n"
        );
    }

    #[test]
    fn sentinel_decodes_as_failure() {
        assert_eq!(
            SensorResponse::parse("TRAFFIC=-1;PRIORITY=false"),
            Ok(SensorResponse::Failure)
        );
    }

    #[test]
    fn legacy_reply_without_priority() {
        assert_eq!(
            SensorResponse::parse("TRAFFIC=7\n"),
            Ok(SensorResponse::Reading {
                traffic: 7,
                priority: false
            })
        );
    }

    #[test]
    fn out_of_range_values_survive_decoding() {
        assert_eq!(
            SensorResponse::parse("TRAFFIC=-9;PRIORITY=false"),
            Ok(SensorResponse::Reading {
                traffic: -9,
                priority: false
            })
        );
        assert_eq!(
            SensorResponse::parse("TRAFFIC=5000;PRIORITY=TRUE"),
            Ok(SensorResponse::Reading {
                traffic: 5000,
                priority: true
            })
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(SensorResponse::parse("  "), Err(ProtocolError::Empty));
        assert!(matches!(
            SensorResponse::parse("TRAFFIC=abc"),
            Err(ProtocolError::BadTraffic(_))
        ));
        assert!(matches!(
            SensorResponse::parse("TRAFFIC=3;PRIORITY=maybe"),
            Err(ProtocolError::BadPriority(_))
        ));
        assert!(matches!(
            SensorResponse::parse("HELLO"),
            Err(ProtocolError::Unrecognized(_))
        ));
        assert!(matches!(
            SensorResponse::parse("PRIORITY=true"),
            Err(ProtocolError::Unrecognized(_))
        ));
    }
}
