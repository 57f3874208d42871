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

//! Fixed binary encoding of lock ownership records.
//!
//! Layout: `[host len][host][key len][key][thread len][thread][locked-at]`,
//! each length a single byte and the timestamp eight big-endian bytes of
//! epoch milliseconds.

use crate::error::{LockyardError, Result};
use chrono::{DateTime, Utc};
use std::fmt;

pub const MAX_FIELD_LEN: usize = u8::MAX as usize;

/// Display format of acquisition timestamps.
pub const LOCKED_AT_FORMAT: &str = "%Y-%m-%d@%H:%M:%S%.3f";

/// Who holds a keyed-store lock and since when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    pub host: String,
    pub key: String,
    pub thread_name: String,
    pub locked_at: DateTime<Utc>,
}

impl LockRecord {
    pub fn new(
        host: impl Into<String>,
        key: impl Into<String>,
        thread_name: impl Into<String>,
        locked_at: DateTime<Utc>,
    ) -> Self {
        Self {
            host: host.into(),
            key: key.into(),
            thread_name: thread_name.into(),
            locked_at,
        }
    }

    /// Fails when a string field exceeds 255 bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(
            3 + self.host.len() + self.key.len() + self.thread_name.len() + 8,
        );
        for (name, value) in [
            ("host", &self.host),
            ("key", &self.key),
            ("thread name", &self.thread_name),
        ] {
            let len = u8::try_from(value.len()).map_err(|_| {
                LockyardError::Serialization(format!(
                    "{name} is {} bytes; lock records allow at most {MAX_FIELD_LEN}",
                    value.len()
                ))
            })?;
            bytes.push(len);
            bytes.extend_from_slice(value.as_bytes());
        }
        bytes.extend_from_slice(&self.locked_at.timestamp_millis().to_be_bytes());
        Ok(bytes)
    }

    /// An empty input means "no record".
    pub fn decode(bytes: &[u8]) -> Result<Option<Self>> {
        if bytes.is_empty() {
            return Ok(None);
        }

        let mut reader = Reader { bytes, offset: 0 };
        let host = reader.string("host")?;
        let key = reader.string("key")?;
        let thread_name = reader.string("thread name")?;
        let millis = i64::from_be_bytes(reader.array("timestamp")?);
        if reader.offset != bytes.len() {
            return Err(LockyardError::Serialization(format!(
                "{} trailing byte(s) after lock record",
                bytes.len() - reader.offset
            )));
        }

        let locked_at = DateTime::from_timestamp_millis(millis).ok_or_else(|| {
            LockyardError::Serialization(format!("timestamp {millis} is out of range"))
        })?;
        Ok(Some(Self {
            host,
            key,
            thread_name,
            locked_at,
        }))
    }

    pub fn locked_at_display(&self) -> String {
        self.locked_at.format(LOCKED_AT_FORMAT).to_string()
    }
}

impl fmt::Display for LockRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Lock [key={}, lockedAt={}, thread={}, host={}]",
            self.key,
            self.locked_at_display(),
            self.thread_name,
            self.host
        )
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl Reader<'_> {
    fn take(&mut self, len: usize, what: &str) -> Result<&[u8]> {
        let end = self.offset + len;
        let slice = self.bytes.get(self.offset..end).ok_or_else(|| {
            LockyardError::Serialization(format!("lock record truncated while reading {what}"))
        })?;
        self.offset = end;
        Ok(slice)
    }

    fn array(&mut self, what: &str) -> Result<[u8; 8]> {
        let mut out = [0u8; 8];
        out.copy_from_slice(self.take(8, what)?);
        Ok(out)
    }

    fn string(&mut self, what: &str) -> Result<String> {
        let len = self.take(1, what)?[0] as usize;
        let raw = self.take(len, what)?;
        String::from_utf8(raw.to_vec()).map_err(|err| {
            LockyardError::Serialization(format!("{what} is not valid UTF-8: {err}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::Rng;
    use rand::distributions::Alphanumeric;

    fn sample() -> LockRecord {
        LockRecord::new(
            "build-01",
            "order-42",
            "worker-3",
            Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap()
                + chrono::Duration::milliseconds(589),
        )
    }

    #[test]
    fn encodes_fixed_layout() {
        let bytes = sample().encode().unwrap();
        assert_eq!(bytes[0], 8);
        assert_eq!(&bytes[1..9], b"build-01");
        assert_eq!(bytes[9], 8);
        assert_eq!(&bytes[10..18], b"order-42");
        assert_eq!(bytes[18], 8);
        assert_eq!(&bytes[19..27], b"worker-3");
        assert_eq!(bytes.len(), 27 + 8);
        let millis = i64::from_be_bytes(bytes[27..35].try_into().unwrap());
        assert_eq!(millis, sample().locked_at.timestamp_millis());
    }

    #[test]
    fn empty_input_is_no_record() {
        assert_eq!(LockRecord::decode(&[]).unwrap(), None);
    }

    #[test]
    fn random_records_round_trip() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let mut field = |max: usize| -> String {
                let len = rng.gen_range(0..=max);
                (&mut rng)
                    .sample_iter(&Alphanumeric)
                    .take(len)
                    .map(char::from)
                    .collect()
            };
            let record = LockRecord::new(
                field(MAX_FIELD_LEN),
                field(MAX_FIELD_LEN),
                field(MAX_FIELD_LEN),
                DateTime::from_timestamp_millis(1_700_000_000_123).unwrap(),
            );
            let decoded = LockRecord::decode(&record.encode().unwrap()).unwrap();
            assert_eq!(decoded, Some(record));
        }
    }

    #[test]
    fn oversized_field_is_rejected() {
        let mut record = sample();
        record.key = "k".repeat(MAX_FIELD_LEN + 1);
        let err = record.encode().unwrap_err();
        assert!(matches!(err, LockyardError::Serialization(_)));
        assert!(err.to_string().contains("key is 256 bytes"));
    }

    #[test]
    fn truncated_and_padded_input_fail() {
        let bytes = sample().encode().unwrap();
        assert!(LockRecord::decode(&bytes[..bytes.len() - 1]).is_err());
        assert!(LockRecord::decode(&bytes[..5]).is_err());

        let mut padded = bytes.clone();
        padded.push(0);
        assert!(LockRecord::decode(&padded).is_err());
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let bytes = [1u8, 0xff, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert!(LockRecord::decode(&bytes).is_err());
    }

    #[test]
    fn display_uses_locked_at_format() {
        assert_eq!(
            sample().to_string(),
            "Lock [key=order-42, lockedAt=2025-03-14@09:26:53.589, thread=worker-3, host=build-01]"
        );
    }
}
