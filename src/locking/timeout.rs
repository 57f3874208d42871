// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Lock wait budgets and the precedence rules used to pick one.

use std::fmt;
use std::time::Duration;

/// How long an acquisition may wait for another holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockTimeoutValue {
    Finite(Duration),
    Infinite,
}

impl LockTimeoutValue {
    pub const fn from_secs(seconds: u64) -> Self {
        Self::Finite(Duration::from_secs(seconds))
    }

    pub const fn from_millis(millis: u64) -> Self {
        Self::Finite(Duration::from_millis(millis))
    }

    /// The finite budget, or `None` when waiting forever.
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            LockTimeoutValue::Finite(duration) => Some(*duration),
            LockTimeoutValue::Infinite => None,
        }
    }

    pub fn is_infinite(&self) -> bool {
        matches!(self, LockTimeoutValue::Infinite)
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, LockTimeoutValue::Finite(duration) if duration.is_zero())
    }
}

impl From<Duration> for LockTimeoutValue {
    fn from(duration: Duration) -> Self {
        LockTimeoutValue::Finite(duration)
    }
}

impl fmt::Display for LockTimeoutValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockTimeoutValue::Infinite => f.write_str("infinite"),
            LockTimeoutValue::Finite(duration) if duration.subsec_millis() != 0 => {
                write!(f, "{}ms", duration.as_millis())
            }
            LockTimeoutValue::Finite(duration) => write!(f, "{}s", duration.as_secs()),
        }
    }
}

/// Where the effective timeout came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockTimeoutSource {
    #[default]
    Default,
    Config,
    Environment,
    Cli,
}

impl fmt::Display for LockTimeoutSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LockTimeoutSource::Default => "built-in default",
            LockTimeoutSource::Config => "configuration file",
            LockTimeoutSource::Environment => "environment variable",
            LockTimeoutSource::Cli => "command-line flag",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockTimeoutResolution {
    pub value: LockTimeoutValue,
    pub source: LockTimeoutSource,
}

/// Error produced when a timeout override cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockTimeoutParseError {
    value: String,
    origin: &'static str,
}

impl LockTimeoutParseError {
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for LockTimeoutParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Lock timeout '{}' from {} is invalid. Use seconds (e.g. '30' or '30s'), \
             milliseconds ('500ms'), minutes ('2m'), or 'infinite'.",
            self.value, self.origin
        )
    }
}

impl std::error::Error for LockTimeoutParseError {}

/// Parses a timeout such as `30`, `30s`, `500ms`, `2m` or `infinite`.
pub fn parse_timeout_override(value: &str) -> Result<LockTimeoutValue, LockTimeoutParseError> {
    parse_with_origin(value, "input")
}

fn parse_with_origin(
    value: &str,
    origin: &'static str,
) -> Result<LockTimeoutValue, LockTimeoutParseError> {
    let trimmed = value.trim();
    let invalid = || LockTimeoutParseError {
        value: trimmed.to_string(),
        origin,
    };

    if trimmed.eq_ignore_ascii_case("infinite") {
        return Ok(LockTimeoutValue::Infinite);
    }

    let lower = trimmed.to_ascii_lowercase();
    let (digits, scale_ms) = if let Some(number) = lower.strip_suffix("ms") {
        (number, 1)
    } else if let Some(number) = lower.strip_suffix('s') {
        (number, 1_000)
    } else if let Some(number) = lower.strip_suffix('m') {
        (number, 60_000)
    } else {
        (lower.as_str(), 1_000)
    };

    let amount = digits.trim().parse::<u64>().map_err(|_| invalid())?;
    let millis = amount.checked_mul(scale_ms).ok_or_else(invalid)?;
    Ok(LockTimeoutValue::from_millis(millis))
}

/// Resolves the effective timeout with command line > environment > config > default precedence.
pub struct LockTimeoutResolver<'a> {
    cli_override: Option<&'a str>,
    env_override: Option<&'a str>,
    config_value: LockTimeoutValue,
    default_value: LockTimeoutValue,
}

impl<'a> LockTimeoutResolver<'a> {
    pub fn new(
        cli_override: Option<&'a str>,
        env_override: Option<&'a str>,
        config_value: LockTimeoutValue,
        default_value: LockTimeoutValue,
    ) -> Self {
        Self {
            cli_override,
            env_override,
            config_value,
            default_value,
        }
    }

    pub fn resolve(self) -> Result<LockTimeoutResolution, LockTimeoutParseError> {
        if let Some(cli_value) = self.cli_override {
            return Ok(LockTimeoutResolution {
                value: parse_with_origin(cli_value, "the command line")?,
                source: LockTimeoutSource::Cli,
            });
        }

        if let Some(env_value) = self.env_override.filter(|value| !value.trim().is_empty()) {
            return Ok(LockTimeoutResolution {
                value: parse_with_origin(env_value, "the environment")?,
                source: LockTimeoutSource::Environment,
            });
        }

        let source = if self.config_value == self.default_value {
            LockTimeoutSource::Default
        } else {
            LockTimeoutSource::Config
        };
        Ok(LockTimeoutResolution {
            value: self.config_value,
            source,
        })
    }
}
