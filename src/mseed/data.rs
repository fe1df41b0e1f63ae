use anyhow::{anyhow, bail};

use super::header::DataEncoding;
use super::steim;

macro_rules! decode_data {
    ($data: expr, $typ: ident) => {{
        const SIZE: usize = std::mem::size_of::<$typ>();
        if $data.len() % SIZE != 0 {
            bail!("payload length {} is not a multiple of {}", $data.len(), SIZE);
        }
        $data
            .chunks_exact(SIZE)
            .map(|b| {
                let mut byte = [0; SIZE];
                byte.copy_from_slice(b);
                <$typ>::from_le_bytes(byte)
            })
            .collect()
    }};
}

macro_rules! encode_data {
    ($values: expr) => {
        $values.iter().flat_map(|v| v.to_le_bytes()).collect()
    };
}

/// The decoded payload of a record.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum DecodedData {
    #[default]
    None,
    Text(String),
    F32(Vec<f32>),
    F64(Vec<f64>),
    I16(Vec<i16>),
    I32(Vec<i32>),
}

impl DecodedData {
    pub fn decode(
        encoding: DataEncoding,
        payload: &[u8],
        sample_count: usize,
        sid: &str,
    ) -> anyhow::Result<Self> {
        let data = match encoding {
            DataEncoding::Text => DecodedData::Text(
                String::from_utf8(payload.to_vec())
                    .map_err(|e| anyhow!("{sid}: text payload is not UTF-8: {e}"))?,
            ),
            DataEncoding::I16 => DecodedData::I16(decode_data!(payload, i16)),
            DataEncoding::I32 => DecodedData::I32(decode_data!(payload, i32)),
            DataEncoding::F32 => DecodedData::F32(decode_data!(payload, f32)),
            DataEncoding::F64 => DecodedData::F64(decode_data!(payload, f64)),
            DataEncoding::Steim1 => {
                DecodedData::I32(steim::decode_steim1(payload, sample_count, sid)?)
            }
            DataEncoding::Steim2 => {
                DecodedData::I32(steim::decode_steim2(payload, sample_count, sid)?)
            }
            DataEncoding::Other(code) => bail!("{sid}: unsupported data encoding {code}"),
        };
        if !matches!(data, DecodedData::Text(_)) && data.len() != sample_count {
            bail!(
                "{sid}: decoded {} samples but header announces {}",
                data.len(),
                sample_count
            );
        }
        Ok(data)
    }

    /// Encoding and payload bytes. Integer data is written uncompressed.
    pub fn encode(&self) -> anyhow::Result<(DataEncoding, Vec<u8>)> {
        Ok(match self {
            DecodedData::None => (DataEncoding::Text, Vec::new()),
            DecodedData::Text(s) => (DataEncoding::Text, s.as_bytes().to_vec()),
            DecodedData::I16(v) => (DataEncoding::I16, encode_data!(v)),
            DecodedData::I32(v) => (DataEncoding::I32, encode_data!(v)),
            DecodedData::F32(v) => (DataEncoding::F32, encode_data!(v)),
            DecodedData::F64(v) => (DataEncoding::F64, encode_data!(v)),
        })
    }

    /// Number of samples; text payloads count as none.
    pub fn len(&self) -> usize {
        match self {
            DecodedData::None | DecodedData::Text(_) => 0,
            DecodedData::F32(v) => v.len(),
            DecodedData::F64(v) => v.len(),
            DecodedData::I16(v) => v.len(),
            DecodedData::I32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Samples as floating point, `None` for text payloads.
    pub fn to_f64(&self) -> Option<Vec<f64>> {
        match self {
            DecodedData::None => Some(Vec::new()),
            DecodedData::Text(_) => None,
            DecodedData::F32(v) => Some(v.iter().map(|&x| x as f64).collect()),
            DecodedData::F64(v) => Some(v.clone()),
            DecodedData::I16(v) => Some(v.iter().map(|&x| x as f64).collect()),
            DecodedData::I32(v) => Some(v.iter().map(|&x| x as f64).collect()),
        }
    }
}
