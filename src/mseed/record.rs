use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context};

use super::data::DecodedData;
use super::header::{
    nslc_to_sid, DataEncoding, FieldFlag, MS3Header, MS3Time, SampleRP, CRC_OFFSET,
    FIXED_HEADER_LEN,
};
use crate::trace::Trace;

/// iSCSI CRC-32C
pub(crate) const CRC32C: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISCSI);

/// One miniSEED 3 record: header, optional JSON extra headers and the raw
/// payload. The payload is decoded on demand.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MS3Record {
    header: MS3Header,
    extra: Option<serde_json::Value>,
    payload: Vec<u8>,
}

impl MS3Record {
    /// Parse the record at the start of `bytes`, returning it together with
    /// the number of bytes it occupies.
    pub fn parse(bytes: &[u8]) -> anyhow::Result<(Self, usize)> {
        let header = MS3Header::parse(bytes)?;
        let len = header.record_len();
        if bytes.len() < len {
            bail!(
                "{}: record truncated, {} of {} bytes",
                header.sid(),
                bytes.len(),
                len
            );
        }
        let record = &bytes[..len];

        let mut digest = CRC32C.digest();
        digest.update(&record[..CRC_OFFSET]);
        digest.update(&[0u8; 4]);
        digest.update(&record[CRC_OFFSET + 4..]);
        let crc = digest.finalize();
        if crc != header.castagnoli {
            bail!(
                "{}: CRC mismatch, computed {:#010X}, header has {:#010X}",
                header.sid(),
                crc,
                header.castagnoli
            );
        }

        let ex_start = FIXED_HEADER_LEN + header.sid.len();
        let data_start = ex_start + header.ex_hd_len as usize;
        let extra = if header.ex_hd_len > 0 {
            Some(
                serde_json::from_slice(&record[ex_start..data_start])
                    .with_context(|| format!("{}: invalid extra headers", header.sid()))?,
            )
        } else {
            None
        };
        let payload = record[data_start..].to_vec();
        log::trace!(
            "parsed record {} ({} bytes, {} samples, {})",
            header.sid(),
            len,
            header.sample_count,
            header.data_payload_encoding
        );
        Ok((
            Self {
                header,
                extra,
                payload,
            },
            len,
        ))
    }

    pub fn header(&self) -> &MS3Header {
        &self.header
    }

    pub fn extra_headers(&self) -> Option<&serde_json::Value> {
        self.extra.as_ref()
    }

    pub fn raw(&self) -> &[u8] {
        &self.payload
    }

    pub fn data(&self) -> anyhow::Result<DecodedData> {
        DecodedData::decode(
            self.header.data_payload_encoding,
            &self.payload,
            self.header.sample_count as usize,
            self.header.sid(),
        )
    }

    /// Decoded samples as floating point.
    pub fn samples(&self) -> anyhow::Result<Vec<f64>> {
        self.data()?
            .to_f64()
            .ok_or_else(|| anyhow!("{}: text record has no samples", self.header.sid()))
    }

    /// Decode the record into a trace.
    pub fn to_trace(&self) -> anyhow::Result<Trace> {
        Ok(Trace::new(
            self.header.nslc()?,
            self.header.tmin()?,
            self.header.deltat(),
            self.samples()?,
        ))
    }

    /// Serialize, computing the CRC.
    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        let extra = match &self.extra {
            Some(value) => serde_json::to_vec(value)?,
            None => Vec::new(),
        };
        let mut header = self.header.clone();
        header.ex_hd_len = u16::try_from(extra.len())
            .map_err(|_| anyhow!("extra headers longer than {} bytes", u16::MAX))?;
        header.data_len = u32::try_from(self.payload.len())
            .map_err(|_| anyhow!("payload longer than {} bytes", u32::MAX))?;
        header.castagnoli = 0;

        let mut bytes = header.bytes()?;
        bytes.extend_from_slice(&extra);
        bytes.extend_from_slice(&self.payload);
        let crc = CRC32C.checksum(&bytes);
        bytes[CRC_OFFSET..CRC_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());
        Ok(bytes)
    }
}

impl fmt::Display for MS3Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let h = &self.header;
        write!(
            f,
            "{}, {}, {} samples, {} Hz, {}",
            h.sid,
            h.data_public_version,
            h.sample_count,
            h.sample_rate.get_sample_rate(),
            h.start_time
        )
    }
}

/// Iterator over the records of a file or byte buffer.
///
/// Parsing stops at the first undecodable record; the error is kept and
/// can be inspected with [`MS3Volume::error`].
#[derive(Debug)]
pub struct MS3Volume {
    bytes: Vec<u8>,
    offset: usize,
    error: Option<anyhow::Error>,
}

impl MS3Volume {
    pub fn from_bytes(bytes: Vec<u8>) -> anyhow::Result<Self> {
        if !bytes.is_empty() && bytes.len() < FIXED_HEADER_LEN {
            bail!("input shorter than one record header: {} bytes", bytes.len());
        }
        Ok(Self {
            bytes,
            offset: 0,
            error: None,
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
        Self::from_bytes(bytes)
    }

    pub fn error(&self) -> Option<&anyhow::Error> {
        self.error.as_ref()
    }

    /// Collect all records, failing on the first bad one.
    pub fn records(mut self) -> anyhow::Result<Vec<MS3Record>> {
        let records: Vec<MS3Record> = self.by_ref().collect();
        match self.error {
            Some(e) => Err(e),
            None => Ok(records),
        }
    }
}

impl Iterator for MS3Volume {
    type Item = MS3Record;

    fn next(&mut self) -> Option<Self::Item> {
        if self.error.is_some() || self.offset >= self.bytes.len() {
            return None;
        }
        match MS3Record::parse(&self.bytes[self.offset..]) {
            Ok((record, len)) => {
                self.offset += len;
                Some(record)
            }
            Err(e) => {
                log::debug!("stop reading at byte offset {}: {}", self.offset, e);
                self.error = Some(e.context(format!("at byte offset {}", self.offset)));
                None
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct MS3RecordBuilder {
    header: MS3Header,
    data: DecodedData,
    extra: Option<serde_json::Value>,
}

impl MS3RecordBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flag(mut self, flag: FieldFlag) -> Self {
        self.header.flag = flag;
        self
    }

    pub fn start_time(mut self, time: MS3Time) -> Self {
        self.header.start_time = time;
        self
    }

    pub fn sample_rate(mut self, rate: f64) -> Self {
        self.header.sample_rate = rate.into();
        self
    }

    pub fn deltat(mut self, deltat: f64) -> Self {
        self.header.sample_rate = SampleRP::from_deltat(deltat);
        self
    }

    pub fn data_public_version(mut self, version: u8) -> Self {
        self.header.data_public_version = version;
        self
    }

    pub fn sid(mut self, sid: &str) -> anyhow::Result<Self> {
        if sid.len() > u8::MAX as usize {
            bail!("source identifier longer than 255 bytes: {sid}");
        }
        self.header.sid = sid.to_string();
        Ok(self)
    }

    pub fn extra_headers(mut self, extra: serde_json::Value) -> Self {
        self.extra = Some(extra);
        self
    }

    pub fn data(mut self, data: DecodedData) -> Self {
        self.data = data;
        self
    }

    pub fn build(self) -> anyhow::Result<MS3Record> {
        if self.header.sid.is_empty() {
            bail!("record needs a source identifier");
        }
        let (encoding, payload) = self.data.encode()?;
        let mut header = self.header;
        header.data_payload_encoding = encoding;
        header.sample_count = u32::try_from(self.data.len())
            .map_err(|_| anyhow!("too many samples for one record"))?;
        header.data_len = payload.len() as u32;
        Ok(MS3Record {
            header,
            extra: self.extra,
            payload,
        })
    }
}

/// Samples per record when writing traces.
const SAMPLES_PER_RECORD: usize = 4096;

/// Split a trace into float64 records.
pub fn records_from_trace(trace: &Trace) -> anyhow::Result<Vec<MS3Record>> {
    let sid = nslc_to_sid(&trace.codes);
    trace
        .ydata
        .chunks(SAMPLES_PER_RECORD)
        .enumerate()
        .map(|(i, chunk)| {
            let tmin = trace.tmin + (i * SAMPLES_PER_RECORD) as f64 * trace.deltat;
            MS3RecordBuilder::new()
                .start_time(MS3Time::from_timestamp(tmin)?)
                .deltat(trace.deltat)
                .sid(&sid)?
                .data(DecodedData::F64(chunk.to_vec()))
                .build()
        })
        .collect()
}

/// Write traces to one miniSEED 3 file.
pub fn write_traces(path: impl AsRef<Path>, traces: &[Trace]) -> anyhow::Result<()> {
    let path = path.as_ref();
    let mut bytes = Vec::new();
    for trace in traces {
        for record in records_from_trace(trace)? {
            bytes.extend(record.to_bytes()?);
        }
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("cannot create directory {}", parent.display()))?;
    }
    fs::write(path, bytes).with_context(|| format!("cannot write {}", path.display()))?;
    log::debug!("wrote {} traces to {}", traces.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codes::Nslc;

    fn record() -> MS3Record {
        MS3RecordBuilder::new()
            .data(DecodedData::I32(vec![1, 2, 3, -4]))
            .sample_rate(20.0)
            .start_time(MS3Time::from_parts(2022, 6, 5, 20, 32, 38, 500_000_000).unwrap())
            .flag(FieldFlag::ClockLocked)
            .sid("FDSN:XX_TEST__B_H_Z")
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn build_and_parse() {
        let bytes = record().to_bytes().unwrap();
        assert_eq!(&bytes[..2], b"MS");
        let (parsed, len) = MS3Record::parse(&bytes).unwrap();
        assert_eq!(len, bytes.len());
        assert_eq!(parsed.header().sample_count(), 4);
        assert_eq!(parsed.header().encoding(), DataEncoding::I32);
        assert_eq!(parsed.header().flags(), FieldFlag::ClockLocked);
        assert_eq!(parsed.data().unwrap(), DecodedData::I32(vec![1, 2, 3, -4]));

        let tr = parsed.to_trace().unwrap();
        assert_eq!(tr.codes, Nslc::new("XX", "TEST", "", "BHZ"));
        assert_eq!(tr.deltat, 0.05);
        assert!((tr.tmin - 1654461158.5).abs() < 1e-6);
    }

    #[test]
    fn crc_is_checked() {
        let mut bytes = record().to_bytes().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let err = MS3Record::parse(&bytes).unwrap_err();
        assert!(err.to_string().contains("CRC"), "{err}");
    }

    #[test]
    fn extra_headers_survive() {
        let rec = MS3RecordBuilder::new()
            .data(DecodedData::F32(vec![0.5]))
            .sample_rate(1.0)
            .sid("FDSN:XX_TEST__L_H_Z")
            .unwrap()
            .extra_headers(serde_json::json!({"FDSN": {"Time": {"Quality": 100}}}))
            .build()
            .unwrap();
        let (parsed, _) = MS3Record::parse(&rec.to_bytes().unwrap()).unwrap();
        assert_eq!(
            parsed.extra_headers().unwrap()["FDSN"]["Time"]["Quality"],
            100
        );
    }

    #[test]
    fn volume_of_trace_records() {
        let tr = Trace::new(
            Nslc::new("XX", "TEST", "00", "HHN"),
            1_600_000_000.0,
            0.01,
            (0..10_000).map(|i| i as f64 * 0.5).collect(),
        );
        let mut bytes = Vec::new();
        for rec in records_from_trace(&tr).unwrap() {
            bytes.extend(rec.to_bytes().unwrap());
        }
        let records = MS3Volume::from_bytes(bytes).unwrap().records().unwrap();
        assert_eq!(records.len(), 3);
        let mut joined = records[0].to_trace().unwrap();
        for rec in &records[1..] {
            let next = rec.to_trace().unwrap();
            assert!(joined.is_continued_by(&next));
            joined.append(&next);
        }
        assert_eq!(joined.ydata, tr.ydata);
    }
}
