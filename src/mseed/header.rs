//! see <https://docs.fdsn.org/projects/miniseed3/en/latest/definition.html>

use std::fmt;

use anyhow::{anyhow, bail};
use bitflags::bitflags;
use chrono::{DateTime, Datelike, NaiveDate, Timelike};
use serde::{Deserialize, Serialize};

use crate::codes::Nslc;

type MS3Result<T> = anyhow::Result<T>;

pub const FIXED_HEADER_LEN: usize = 40;
pub const CRC_OFFSET: usize = 28;
const RECORD_INDICATOR: &[u8; 2] = b"MS";
const SID_PREFIX: &str = "FDSN:";

/// format_version:
///
/// |  type  | length | offset |
/// |--------|--------|--------|
/// | UINT8  |   1    |    2   |
///
macro_rules! fversion {
    ($fixhd:expr) => {
        $fixhd[2]
    };
}

/// flags, UINT8 at offset 3
macro_rules! flags {
    ($fixhd:expr) => {
        $fixhd[3]
    };
}

/// nanosecond, UINT32 at offset 4
macro_rules! nanosecond {
    ($fixhd:expr) => {
        u32::from_le_bytes([$fixhd[4], $fixhd[5], $fixhd[6], $fixhd[7]])
    };
}

/// year, UINT16 at offset 8; day of year, UINT16 at offset 10
macro_rules! year_doy {
    ($fixhd:expr) => {
        (
            u16::from_le_bytes([$fixhd[8], $fixhd[9]]),
            u16::from_le_bytes([$fixhd[10], $fixhd[11]]),
        )
    };
}

/// sample_rate:
///
/// |   type   | length | offset |
/// |----------|--------|--------|
/// | FLOAT64  |   8    |   16   |
///
macro_rules! sample_rate {
    ($fixhd:expr) => {
        f64::from_le_bytes([
            $fixhd[16], $fixhd[17], $fixhd[18], $fixhd[19], $fixhd[20], $fixhd[21], $fixhd[22],
            $fixhd[23],
        ])
    };
}

/// sample count, UINT32 at offset 24
macro_rules! sample_count {
    ($fixhd:expr) => {
        u32::from_le_bytes([$fixhd[24], $fixhd[25], $fixhd[26], $fixhd[27]])
    };
}

/// CRC-32C, UINT32 at offset 28
macro_rules! castagnoli {
    ($fixhd:expr) => {
        u32::from_le_bytes([$fixhd[28], $fixhd[29], $fixhd[30], $fixhd[31]])
    };
}

/// length of extra headers, UINT16 at offset 34
macro_rules! extra_headers_length {
    ($fixhd:expr) => {
        u16::from_le_bytes([$fixhd[34], $fixhd[35]])
    };
}

/// length of data payload, UINT32 at offset 36
macro_rules! data_payload_length {
    ($fixhd:expr) => {
        u32::from_le_bytes([$fixhd[36], $fixhd[37], $fixhd[38], $fixhd[39]])
    };
}

/// The header of a miniSEED 3.0 record. Binary fields are little endian.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct MS3Header {
    pub(crate) format_version: u8,
    pub(crate) flag: FieldFlag,
    /// Time of the first data sample.
    pub(crate) start_time: MS3Time,
    pub(crate) data_payload_encoding: DataEncoding,
    pub(crate) sample_rate: SampleRP,
    pub(crate) sample_count: u32,
    /// CRC-32C of the complete record with this field set to zero.
    pub(crate) castagnoli: u32,
    pub(crate) data_public_version: u8,
    pub(crate) ex_hd_len: u16,
    pub(crate) data_len: u32,
    /// Commonly an FDSN source identifier, `FDSN:NET_STA_LOC_B_S_SS`.
    pub(crate) sid: String,
}

impl Default for MS3Header {
    fn default() -> Self {
        Self {
            format_version: 3,
            flag: FieldFlag::empty(),
            start_time: MS3Time::default(),
            data_payload_encoding: DataEncoding::Text,
            sample_rate: Default::default(),
            sample_count: 0,
            castagnoli: 0,
            data_public_version: 1,
            ex_hd_len: 0,
            data_len: 0,
            sid: String::new(),
        }
    }
}

impl MS3Header {
    /// Parse the fixed header and source identifier at the start of `bytes`.
    pub fn parse(bytes: &[u8]) -> MS3Result<Self> {
        if bytes.len() < FIXED_HEADER_LEN {
            bail!("record shorter than fixed header: {} bytes", bytes.len());
        }
        if &bytes[..2] != RECORD_INDICATOR {
            bail!("missing record indicator");
        }
        if fversion!(bytes) != 3 {
            bail!("unsupported miniSEED format version {}", fversion!(bytes));
        }
        let sid_len = bytes[33] as usize;
        if bytes.len() < FIXED_HEADER_LEN + sid_len {
            bail!("record truncated within source identifier");
        }
        let sid = std::str::from_utf8(&bytes[FIXED_HEADER_LEN..FIXED_HEADER_LEN + sid_len])
            .map_err(|e| anyhow!("source identifier is not UTF-8: {e}"))?
            .to_string();
        let (year, day_of_year) = year_doy!(bytes);

        Ok(Self {
            format_version: fversion!(bytes),
            flag: FieldFlag::from_bits_retain(flags!(bytes)),
            start_time: MS3Time {
                nanosecond: nanosecond!(bytes),
                year,
                day_of_year,
                hour: bytes[12],
                minute: bytes[13],
                second: bytes[14],
            },
            data_payload_encoding: DataEncoding::from(bytes[15]),
            sample_rate: sample_rate!(bytes).into(),
            sample_count: sample_count!(bytes),
            castagnoli: castagnoli!(bytes),
            data_public_version: bytes[32],
            ex_hd_len: extra_headers_length!(bytes),
            data_len: data_payload_length!(bytes),
            sid,
        })
    }

    pub fn bytes(&self) -> MS3Result<Vec<u8>> {
        if self.sid.len() > u8::MAX as usize {
            bail!("source identifier longer than 255 bytes");
        }
        let mut bytes = Vec::with_capacity(FIXED_HEADER_LEN + self.sid.len());
        bytes.extend_from_slice(RECORD_INDICATOR);
        bytes.push(self.format_version);
        bytes.push(self.flag.bits());
        bytes.extend_from_slice(&self.start_time.nanosecond.to_le_bytes());
        bytes.extend_from_slice(&self.start_time.year.to_le_bytes());
        bytes.extend_from_slice(&self.start_time.day_of_year.to_le_bytes());
        bytes.push(self.start_time.hour);
        bytes.push(self.start_time.minute);
        bytes.push(self.start_time.second);
        bytes.push(self.data_payload_encoding.code());
        bytes.extend_from_slice(&self.sample_rate.raw.to_le_bytes());
        bytes.extend_from_slice(&self.sample_count.to_le_bytes());
        bytes.extend_from_slice(&self.castagnoli.to_le_bytes());
        bytes.push(self.data_public_version);
        bytes.push(self.sid.len() as u8);
        bytes.extend_from_slice(&self.ex_hd_len.to_le_bytes());
        bytes.extend_from_slice(&self.data_len.to_le_bytes());
        bytes.extend_from_slice(self.sid.as_bytes());
        Ok(bytes)
    }

    /// Total length of the record this header introduces.
    pub fn record_len(&self) -> usize {
        FIXED_HEADER_LEN + self.sid.len() + self.ex_hd_len as usize + self.data_len as usize
    }

    pub fn sid(&self) -> &str {
        &self.sid
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    pub fn encoding(&self) -> DataEncoding {
        self.data_payload_encoding
    }

    pub fn flags(&self) -> FieldFlag {
        self.flag
    }

    /// Sample interval in seconds.
    pub fn deltat(&self) -> f64 {
        let rate = self.sample_rate.get_sample_rate();
        if rate > 0.0 {
            1.0 / rate
        } else {
            0.0
        }
    }

    /// Time of the first sample, seconds since the epoch.
    pub fn tmin(&self) -> MS3Result<f64> {
        self.start_time.timestamp()
    }

    /// Time of the last sample.
    pub fn tmax(&self) -> MS3Result<f64> {
        Ok(self.tmin()? + (self.sample_count.max(1) - 1) as f64 * self.deltat())
    }

    pub fn nslc(&self) -> MS3Result<Nslc> {
        sid_to_nslc(&self.sid)
    }
}

/// `FDSN:NET_STA_LOC_B_S_SS` to NSLC; band, source and subsource are
/// concatenated into the channel code.
pub fn sid_to_nslc(sid: &str) -> MS3Result<Nslc> {
    let body = sid
        .strip_prefix(SID_PREFIX)
        .ok_or_else(|| anyhow!("not an FDSN source identifier: {sid}"))?;
    match body.split('_').collect::<Vec<_>>().as_slice() {
        [net, sta, loc, band, source, subsource] => Ok(Nslc::new(
            net,
            sta,
            loc,
            &format!("{band}{source}{subsource}"),
        )),
        _ => Err(anyhow!("malformed FDSN source identifier: {sid}")),
    }
}

pub fn nslc_to_sid(nslc: &Nslc) -> String {
    let cha = &nslc.channel;
    let (band, source, subsource) = if cha.chars().count() == 3 && cha.is_ascii() {
        (&cha[0..1], &cha[1..2], &cha[2..3])
    } else {
        ("", "", cha.as_str())
    };
    format!(
        "{SID_PREFIX}{}_{}_{}_{band}_{source}_{subsource}",
        nslc.network, nslc.station, nslc.location
    )
}

#[derive(Deserialize, Serialize, Default, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct MS3Time {
    pub(crate) nanosecond: u32,
    pub(crate) year: u16,
    pub(crate) day_of_year: u16,
    pub(crate) hour: u8,
    pub(crate) minute: u8,
    pub(crate) second: u8,
}

impl MS3Time {
    pub fn from_parts(
        y: usize,
        m: usize,
        d: usize,
        h: usize,
        min: usize,
        s: usize,
        ns: usize,
    ) -> MS3Result<Self> {
        let date = NaiveDate::from_ymd_opt(y as i32, m as u32, d as u32)
            .ok_or_else(|| anyhow!("invalid date {y}-{m}-{d}"))?;
        Ok(Self {
            nanosecond: ns as u32,
            year: y as u16,
            day_of_year: date.ordinal() as u16,
            hour: h as u8,
            minute: min as u8,
            second: s as u8,
        })
    }

    pub fn from_timestamp(t: f64) -> MS3Result<Self> {
        let secs = t.floor();
        let nanos = ((t - secs) * 1e9).round().min(999_999_999.0) as u32;
        let dt = DateTime::from_timestamp(secs as i64, nanos)
            .ok_or_else(|| anyhow!("time out of range: {t}"))?;
        Ok(Self {
            nanosecond: dt.nanosecond(),
            year: dt.year() as u16,
            day_of_year: dt.ordinal() as u16,
            hour: dt.hour() as u8,
            minute: dt.minute() as u8,
            second: dt.second() as u8,
        })
    }

    /// Seconds since the epoch. A leap second (second = 60) is counted as
    /// the first second of the following minute.
    pub fn timestamp(&self) -> MS3Result<f64> {
        let date = NaiveDate::from_yo_opt(self.year as i32, self.day_of_year as u32)
            .ok_or_else(|| anyhow!("invalid year/day {}/{}", self.year, self.day_of_year))?;
        let midnight = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| anyhow!("invalid date"))?
            .and_utc()
            .timestamp();
        Ok(midnight as f64
            + self.hour as f64 * 3600.0
            + self.minute as f64 * 60.0
            + self.second as f64
            + self.nanosecond as f64 * 1e-9)
    }
}

impl fmt::Display for MS3Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match NaiveDate::from_yo_opt(self.year as i32, self.day_of_year as u32) {
            Some(date) => write!(
                f,
                "{}T{:02}:{:02}:{:02}.{:09}Z",
                date, self.hour, self.minute, self.second, self.nanosecond
            ),
            None => write!(f, "{:04}-{:03}(invalid)", self.year, self.day_of_year),
        }
    }
}

bitflags! {
    /// UINT8
    /// - 0: Calibration signals present.
    /// - 1: Time tag is questionable.
    /// - 2: Clock locked.
    #[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FieldFlag: u8 {
        const CalibrationSignals = 0b001;
        const QuestionableTimeTag = 0b010;
        const ClockLocked = 0b100;
    }
}

/// Data payload encodings, identified by a code.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataEncoding {
    Text,
    I16,
    I32,
    F32,
    F64,
    Steim1,
    Steim2,
    /// Known but unsupported, or reserved codes.
    Other(u8),
}

impl DataEncoding {
    pub fn code(&self) -> u8 {
        match self {
            DataEncoding::Text => 0,
            DataEncoding::I16 => 1,
            DataEncoding::I32 => 3,
            DataEncoding::F32 => 4,
            DataEncoding::F64 => 5,
            DataEncoding::Steim1 => 10,
            DataEncoding::Steim2 => 11,
            DataEncoding::Other(code) => *code,
        }
    }
}

impl From<u8> for DataEncoding {
    fn from(value: u8) -> Self {
        match value {
            0 => DataEncoding::Text,
            1 => DataEncoding::I16,
            3 => DataEncoding::I32,
            4 => DataEncoding::F32,
            5 => DataEncoding::F64,
            10 => DataEncoding::Steim1,
            11 => DataEncoding::Steim2,
            other => DataEncoding::Other(other),
        }
    }
}

impl fmt::Display for DataEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataEncoding::Other(code) => write!(f, "Encoding({code})"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Sample Rate and Period
///
/// Positive values are a rate in samples per second, negative values a
/// period in seconds.
#[derive(Deserialize, Serialize, Debug, Default, Clone, Copy, PartialEq)]
pub struct SampleRP {
    pub(crate) raw: f64,
}

impl From<f64> for SampleRP {
    fn from(raw: f64) -> Self {
        SampleRP { raw }
    }
}

impl SampleRP {
    pub fn get_raw(&self) -> f64 {
        self.raw
    }

    /// Encode a sample interval, using period notation below 1 Hz.
    pub fn from_deltat(deltat: f64) -> Self {
        if deltat > 1.0 {
            SampleRP { raw: -deltat }
        } else {
            SampleRP { raw: 1.0 / deltat }
        }
    }

    pub fn get_sample_rate(&self) -> f64 {
        if self.raw >= 0.0 {
            self.raw
        } else {
            -1. / self.raw
        }
    }
}
