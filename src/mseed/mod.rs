//! miniSEED 3 records: header, payload codecs and record-level I/O.

mod data;
mod header;
mod record;
mod steim;

pub use data::DecodedData;
pub use header::{
    nslc_to_sid, sid_to_nslc, DataEncoding, FieldFlag, MS3Header, MS3Time, SampleRP,
};
pub use record::{records_from_trace, write_traces, MS3Record, MS3RecordBuilder, MS3Volume};
