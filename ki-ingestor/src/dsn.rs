//! Connection strings of the form
//! `[user[:password]@][transport[(address)]]/database[?key=value&...]`.
//!
//! Two query keys are consumed while parsing instead of being kept as store
//! parameters: `loc` names an IANA time zone and `timeout` is a dial timeout
//! written as a duration literal such as `500ms` or `1m30s`.

use std::{collections::HashMap, fmt, str::FromStr, sync::LazyLock, time::Duration};

use chrono_tz::Tz;
use regex::Regex;

use crate::errors::DsnError;

pub const DEFAULT_TRANSPORT: &str = "tcp";
pub const DEFAULT_ADDRESS: &str = "localhost:8081";
pub const DEFAULT_SERIES: &str = "session-1";

/// Query key naming the target series.
pub const SERIES_KEY: &str = "s";

const LOC_KEY: &str = "loc";
const TIMEOUT_KEY: &str = "timeout";

static DSN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?:(?P<user>[^/]*?)(?::(?P<password>[^/]*))?@)?",
        r"(?:(?P<transport>[^(/]*)(?:\((?P<address>[^)]*)\))?)?",
        r"/(?P<database>.*?)",
        r"(?:\?(?P<params>.*))?$",
    ))
    .expect("connection string pattern is valid")
});

#[derive(Debug, Clone, PartialEq)]
pub struct Dsn {
    pub user: Option<String>,
    pub password: Option<String>,
    pub transport: String,
    pub address: String,
    pub database: String,
    pub parameters: HashMap<String, String>,
    pub time_zone: Tz,
    /// Zero means no timeout.
    pub dial_timeout: Duration,
}

impl Default for Dsn {
    fn default() -> Self {
        Self {
            user: None,
            password: None,
            transport: DEFAULT_TRANSPORT.to_owned(),
            address: DEFAULT_ADDRESS.to_owned(),
            database: String::new(),
            parameters: HashMap::from([(SERIES_KEY.to_owned(), DEFAULT_SERIES.to_owned())]),
            time_zone: Tz::UTC,
            dial_timeout: Duration::ZERO,
        }
    }
}

impl Dsn {
    pub fn parse(input: &str) -> Result<Self, DsnError> {
        let caps = DSN_PATTERN
            .captures(input)
            .ok_or_else(|| DsnError::NoMatch(input.to_owned()))?;

        // An absent segment and an empty one are the same thing here
        let segment = |name: &str| {
            caps.name(name)
                .map(|m| m.as_str())
                .filter(|s| !s.is_empty())
        };

        let mut dsn = Self {
            user: segment("user").map(str::to_owned),
            password: segment("password").map(str::to_owned),
            database: segment("database").unwrap_or_default().to_owned(),
            ..Default::default()
        };

        if let Some(transport) = segment("transport") {
            dsn.transport = transport.to_owned();
        }
        if let Some(address) = segment("address") {
            dsn.address = address.to_owned();
        }
        if let Some(params) = segment("params") {
            dsn.apply_params(params)?;
        }

        Ok(dsn)
    }

    fn apply_params(&mut self, params: &str) -> Result<(), DsnError> {
        for pair in params.split('&') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };

            match key {
                LOC_KEY => self.time_zone = parse_time_zone(value)?,
                TIMEOUT_KEY => self.dial_timeout = parse_duration(value)?,
                _ => {
                    self.parameters.insert(key.to_owned(), value.to_owned());
                }
            }
        }
        Ok(())
    }

    /// Name of the series every point of this run is written to.
    pub fn series(&self) -> &str {
        self.parameters
            .get(SERIES_KEY)
            .map(String::as_str)
            .unwrap_or(DEFAULT_SERIES)
    }

    /// Parameters meant for the store itself, i.e. everything but the series name.
    pub fn store_params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.parameters
            .iter()
            .filter(|(k, _)| k.as_str() != SERIES_KEY)
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromStr for Dsn {
    type Err = DsnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Prints the connection string back out with the password masked, for logs.
impl fmt::Display for Dsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(user) = &self.user {
            write!(f, "{user}")?;
            if self.password.is_some() {
                write!(f, ":***")?;
            }
            write!(f, "@")?;
        }
        write!(f, "{}({})/{}", self.transport, self.address, self.database)
    }
}

/// Empty means UTC. `Local` is not a zone name and is rejected like any other
/// unknown zone.
fn parse_time_zone(name: &str) -> Result<Tz, DsnError> {
    if name.is_empty() {
        return Ok(Tz::UTC);
    }
    name.parse::<Tz>().map_err(|e| DsnError::UnknownTimeZone {
        name: name.to_owned(),
        reason: e.to_string(),
    })
}

/// Parses a sequence of decimal numbers each followed by a unit, e.g. `300ms`,
/// `1.5h` or `2h45m`. Valid units are `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`.
/// A bare `0` is also accepted. Negative durations are rejected since a
/// dial timeout can't go backwards.
pub fn parse_duration(literal: &str) -> Result<Duration, DsnError> {
    let invalid = |reason: String| DsnError::InvalidDuration {
        literal: literal.to_owned(),
        reason,
    };

    let mut rest = literal.strip_prefix('+').unwrap_or(literal);
    if rest.starts_with('-') {
        return Err(invalid("negative durations are not allowed".into()));
    }
    if rest == "0" {
        return Ok(Duration::ZERO);
    }
    if rest.is_empty() {
        return Err(invalid("empty duration".into()));
    }

    let mut nanos: u128 = 0;
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_end);

        let unit_end = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_end);

        let scale: u128 = match unit {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60 * 1_000_000_000,
            "h" => 60 * 60 * 1_000_000_000,
            "" => return Err(invalid(format!("missing unit after {number:?}"))),
            other => return Err(invalid(format!("unknown unit {other:?}"))),
        };

        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if (whole.is_empty() && fraction.is_empty()) || fraction.contains('.') {
            return Err(invalid(format!("bad number {number:?}")));
        }

        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .map_err(|_| invalid(format!("bad number {number:?}")))?
        };
        nanos = whole
            .checked_mul(scale)
            .and_then(|n| n.checked_add(nanos))
            .ok_or_else(|| invalid("overflow".into()))?;

        if !fraction.is_empty() {
            let fraction: f64 = format!("0.{fraction}")
                .parse()
                .map_err(|_| invalid(format!("bad number {number:?}")))?;
            nanos += (fraction * scale as f64) as u128;
        }

        rest = tail;
    }

    u64::try_from(nanos)
        .map(Duration::from_nanos)
        .map_err(|_| invalid("overflow".into()))
}
