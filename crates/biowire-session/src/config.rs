use std::fmt;
use std::time::Duration;

use biowire_frame::FrameConfig;
use biowire_transport::PROTOCOL_PORT;
use serde::{Deserialize, Serialize};

/// Tunables shared by server and client sessions.
///
/// Durations deserialize from either an integer number of milliseconds or a
/// humanized string such as `"250ms"`, `"5s"`, `"1.5s"` or `"2m"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name announced to the peer in `ClientInfo`/`ServerInfo`.
    pub display_name: String,

    /// Port used by `bind`/`connect` when none is given.
    pub port: u16,

    /// Upper bound for each handshake step.
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,

    /// Bounded wait of a single receive call.
    #[serde(with = "duration_serde")]
    pub receive_timeout: Duration,

    /// Maximum bytes requested from the transport per receive call.
    pub receive_chunk_size: usize,

    /// How long the send loop blocks on an empty queue before rechecking
    /// its exit conditions.
    #[serde(with = "duration_serde")]
    pub send_poll_interval: Duration,

    /// How long stop waits for each loop before detaching it.
    #[serde(with = "duration_serde")]
    pub join_timeout: Duration,

    /// Frame size limits.
    pub frame: FrameConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            display_name: "biowire".to_string(),
            port: PROTOCOL_PORT,
            handshake_timeout: Duration::from_secs(5),
            receive_timeout: Duration::from_millis(100),
            receive_chunk_size: 1024,
            send_poll_interval: Duration::from_millis(100),
            join_timeout: Duration::from_secs(2),
            frame: FrameConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Default configuration announcing `name`.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            display_name: name.into(),
            ..Self::default()
        }
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

mod duration_serde {
    use std::fmt;
    use std::time::Duration;

    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let secs = duration.as_secs();
        let millis = duration.subsec_millis();
        if secs >= 1 && millis == 0 {
            serializer.serialize_str(&format!("{secs}s"))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(DurationVisitor)
    }

    struct DurationVisitor;

    impl Visitor<'_> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("milliseconds or a duration string like \"250ms\" or \"5s\"")
        }

        fn visit_u64<E: de::Error>(self, millis: u64) -> Result<Duration, E> {
            Ok(Duration::from_millis(millis))
        }

        fn visit_i64<E: de::Error>(self, millis: i64) -> Result<Duration, E> {
            u64::try_from(millis)
                .map(Duration::from_millis)
                .map_err(|_| E::custom(format!("negative duration: {millis}")))
        }

        fn visit_str<E: de::Error>(self, s: &str) -> Result<Duration, E> {
            super::parse_duration(s).map_err(E::custom)
        }
    }
}

/// Parse a humanized duration: `"250ms"`, `"5s"`, `"1.5s"` or `"2m"`.
///
/// Units are case-insensitive. Values that do not fit a `Duration` of whole
/// milliseconds are rejected.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim().to_lowercase();
    if let Some(num) = s.strip_suffix("ms") {
        let millis: u64 = num
            .trim()
            .parse()
            .map_err(|_| format!("invalid milliseconds: {num}"))?;
        return Ok(Duration::from_millis(millis));
    }
    if let Some(num) = s.strip_suffix('s') {
        let secs: f64 = num
            .trim()
            .parse()
            .map_err(|_| format!("invalid seconds: {num}"))?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(format!("invalid seconds: {num}"));
        }
        let millis = (secs * 1000.0).round();
        if millis >= u64::MAX as f64 {
            return Err(format!("duration out of range: {s}"));
        }
        return Ok(Duration::from_millis(millis as u64));
    }
    if let Some(num) = s.strip_suffix('m') {
        let mins: u64 = num
            .trim()
            .parse()
            .map_err(|_| format!("invalid minutes: {num}"))?;
        return mins
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration out of range: {s}"));
    }
    Err(format!("unknown duration format: {s}"))
}

impl fmt::Display for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "name={} port={} handshake={:?} receive={:?}/{}B join={:?}",
            self.display_name,
            self.port,
            self.handshake_timeout,
            self.receive_timeout,
            self.receive_chunk_size,
            self.join_timeout
        )
    }
}
