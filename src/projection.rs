//! Linear combination of recorded components into geographic (E, N, Z) or
//! event-relative (R, T, Z) output channels.

use std::collections::BTreeMap;

use crate::error::TraceError;
use crate::model::{Channel, Station};
use crate::trace::Trace;

/// Coefficients below this are treated as zero.
const COEF_EPS: f64 = 1e-9;
/// Maximum |cos| between directions considered orthogonal.
const ORTHO_EPS: f64 = 1e-3;
/// Maximum misalignment of sample grids, in samples.
const ALIGN_EPS: f64 = 0.01;

#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    /// `matrix[o][i]` weights input channel `i` into output channel `o`.
    pub matrix: Vec<Vec<f64>>,
    pub in_channels: Vec<String>,
    pub out_channels: Vec<String>,
}

fn dot(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

impl Projection {
    /// Input channels each output channel depends on.
    pub fn dependencies(&self) -> BTreeMap<String, Vec<String>> {
        self.out_channels
            .iter()
            .zip(&self.matrix)
            .map(|(out, row)| {
                let deps = self
                    .in_channels
                    .iter()
                    .zip(row)
                    .filter(|(_, c)| c.abs() > COEF_EPS)
                    .map(|(name, _)| name.clone())
                    .collect();
                (out.clone(), deps)
            })
            .collect()
    }

    fn output_index(&self, name: &str) -> Option<usize> {
        self.out_channels.iter().position(|c| c == name)
    }

    /// Project `traces`. Outputs whose inputs are incomplete are skipped;
    /// the rest span the overlap of their inputs.
    pub fn apply(&self, traces: &[Trace]) -> Result<Vec<Trace>, TraceError> {
        let mut projected = Vec::new();
        for (out, row) in self.out_channels.iter().zip(&self.matrix) {
            let mut inputs: Vec<(f64, &Trace)> = Vec::new();
            for (name, &coef) in self.in_channels.iter().zip(row) {
                if coef.abs() <= COEF_EPS {
                    continue;
                }
                let longest = traces
                    .iter()
                    .filter(|tr| tr.channel() == name)
                    .max_by_key(|tr| tr.len());
                match longest {
                    Some(tr) => inputs.push((coef, tr)),
                    None => break,
                }
            }
            let ndeps = row.iter().filter(|c| c.abs() > COEF_EPS).count();
            if inputs.len() != ndeps || inputs.is_empty() {
                continue;
            }
            if let Some(tr) = combine(out, &inputs)? {
                projected.push(tr);
            }
        }
        Ok(projected)
    }
}

/// Weighted sum over the common time span.
fn combine(out: &str, inputs: &[(f64, &Trace)]) -> Result<Option<Trace>, TraceError> {
    let first = inputs[0].1;
    let deltat = first.deltat;
    if inputs
        .iter()
        .any(|(_, tr)| (tr.deltat - deltat).abs() > deltat * 1e-6)
    {
        return Err(TraceError::SamplingMismatch);
    }
    let tmin = inputs.iter().map(|(_, tr)| tr.tmin).fold(f64::MIN, f64::max);
    let tmax = inputs.iter().map(|(_, tr)| tr.tmax()).fold(f64::MAX, f64::min);
    if tmax < tmin {
        return Ok(None);
    }
    let n = ((tmax - tmin) / deltat + ALIGN_EPS).floor() as usize + 1;
    let mut ydata = vec![0.0; n];
    for (coef, tr) in inputs {
        let offset = (tmin - tr.tmin) / deltat;
        if (offset - offset.round()).abs() > ALIGN_EPS {
            log::debug!(
                "cannot project {} into {}: sample grids are not aligned",
                tr.codes,
                out
            );
            return Ok(None);
        }
        let offset = offset.round() as usize;
        for (y, x) in ydata.iter_mut().zip(tr.ydata.iter().skip(offset)) {
            *y += coef * x;
        }
    }
    Ok(Some(Trace::new(
        first.codes.nsl().with_channel(out),
        tmin,
        deltat,
        ydata,
    )))
}

/// Prefix of a channel code, e.g. `HH` for `HHZ`.
fn group_name(name: &str) -> &str {
    match name.char_indices().last() {
        Some((i, _)) => &name[..i],
        None => name,
    }
}

fn enu_projection(chans: &[(&Channel, [f64; 3])], outputs: &[usize]) -> Projection {
    let names = ["E", "N", "Z"];
    Projection {
        matrix: outputs
            .iter()
            .map(|&o| chans.iter().map(|(_, v)| v[o]).collect())
            .collect(),
        in_channels: chans.iter().map(|(c, _)| c.name.clone()).collect(),
        out_channels: outputs.iter().map(|&o| names[o].to_string()).collect(),
    }
}

fn orthogonal(chans: &[(&Channel, [f64; 3])]) -> bool {
    chans.iter().enumerate().all(|(i, (_, a))| {
        chans[i + 1..]
            .iter()
            .all(|(_, b)| dot(a, b).abs() < ORTHO_EPS)
    })
}

/// Projections of each channel group of `station` to E, N and Z, from
/// the sensor orientations.
pub fn projections_to_enz(station: &Station) -> Vec<Projection> {
    let mut groups: BTreeMap<&str, Vec<(&Channel, [f64; 3])>> = BTreeMap::new();
    for channel in &station.channels {
        if let Some(v) = channel.enu() {
            groups
                .entry(group_name(&channel.name))
                .or_default()
                .push((channel, v));
        }
    }

    let mut projections = Vec::new();
    for chans in groups.values() {
        if chans.len() == 3 && orthogonal(chans) {
            projections.push(enu_projection(chans, &[0, 1, 2]));
            continue;
        }
        let horizontal: Vec<_> = chans
            .iter()
            .filter(|(_, v)| v[2].abs() < ORTHO_EPS)
            .cloned()
            .collect();
        if horizontal.len() == 2 && orthogonal(&horizontal) {
            projections.push(enu_projection(&horizontal, &[0, 1]));
        }
        if let Some(vertical) = chans.iter().find(|(_, v)| (v[2].abs() - 1.0).abs() < ORTHO_EPS) {
            projections.push(enu_projection(&[*vertical], &[2]));
        }
    }
    projections
}

/// Rotate the horizontal part of an ENZ projection to radial and
/// transverse. Projections without both E and N are skipped.
pub fn rotate_to_rtz(enz: &Projection, backazimuth: f64) -> Option<Projection> {
    let e = &enz.matrix[enz.output_index("E")?];
    let n = &enz.matrix[enz.output_index("N")?];
    let (sb, cb) = backazimuth.to_radians().sin_cos();
    let mut matrix: Vec<Vec<f64>> = vec![
        e.iter().zip(n).map(|(e, n)| -sb * e - cb * n).collect(),
        e.iter().zip(n).map(|(e, n)| -cb * e + sb * n).collect(),
    ];
    let mut out_channels = vec!["R".to_string(), "T".to_string()];
    if let Some(iz) = enz.output_index("Z") {
        matrix.push(enz.matrix[iz].clone());
        out_channels.push("Z".to_string());
    }
    Some(Projection {
        matrix,
        in_channels: enz.in_channels.clone(),
        out_channels,
    })
}

pub fn projections_to_rtz(station: &Station, backazimuth: f64) -> Vec<Projection> {
    projections_to_enz(station)
        .iter()
        .filter_map(|p| rotate_to_rtz(p, backazimuth))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codes::{Nsl, Nslc};

    fn station(names: &[&str]) -> Station {
        let mut sta = Station::new(&Nsl::new("XX", "STA", ""), 0.0, 0.0);
        sta.set_channels_by_name(names);
        sta
    }

    fn constant(cha: &str, tmin: f64, n: usize, value: f64) -> Trace {
        Trace::new(Nslc::new("XX", "STA", "", cha), tmin, 1.0, vec![value; n])
    }

    #[test]
    fn enz_from_names() {
        let ps = projections_to_enz(&station(&["HHE", "HHN", "HHZ"]));
        assert_eq!(ps.len(), 1);
        let deps = ps[0].dependencies();
        assert_eq!(deps["Z"], vec!["HHZ".to_string()]);
        assert_eq!(deps["E"], vec!["HHE".to_string()]);

        let ps = projections_to_enz(&station(&["BHZ", "HHE", "HHN"]));
        assert_eq!(ps.len(), 2);
        assert_eq!(ps[0].out_channels, vec!["Z".to_string()]);
        assert_eq!(ps[1].out_channels, vec!["E".to_string(), "N".to_string()]);

        assert!(projections_to_enz(&station(&["HH1", "HH2"])).is_empty());
    }

    #[test]
    fn rotated_components() {
        let sta = station(&["HHE", "HHN", "HHZ"]);
        // source due north of the station
        let ps = projections_to_rtz(&sta, 0.0);
        assert_eq!(ps.len(), 1);
        let traces = [
            constant("HHE", 0.0, 10, 1.0),
            constant("HHN", 0.0, 10, 2.0),
            constant("HHZ", 0.0, 10, 3.0),
        ];
        let out = ps[0].apply(&traces).unwrap();
        let get = |c: &str| out.iter().find(|tr| tr.channel() == c).unwrap().ydata[0];
        assert!((get("R") + 2.0).abs() < 1e-12);
        assert!((get("T") + 1.0).abs() < 1e-12);
        assert!((get("Z") - 3.0).abs() < 1e-12);

        assert!(projections_to_rtz(&station(&["HHZ"]), 30.0).is_empty());
    }

    #[test]
    fn partial_inputs_and_overlap() {
        let ps = projections_to_enz(&station(&["HHE", "HHN", "HHZ"]));
        let traces = [constant("HHZ", 5.0, 10, 1.0), constant("HHE", 0.0, 10, 2.0)];
        let out = ps[0].apply(&traces).unwrap();
        let names: Vec<&str> = out.iter().map(|tr| tr.channel()).collect();
        assert_eq!(names, vec!["E", "Z"]);
        assert_eq!(out[0].codes, Nslc::new("XX", "STA", "", "E"));

        let mut horiz = projections_to_rtz(&station(&["HHE", "HHN"]), 45.0);
        let p = horiz.remove(0);
        let out = p
            .apply(&[constant("HHE", 0.0, 10, 1.0), constant("HHN", 4.0, 10, 1.0)])
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].tmin, 4.0);
        assert_eq!(out[0].len(), 6);
    }

    #[test]
    fn sampling_mismatch() {
        let ps = projections_to_rtz(&station(&["HHE", "HHN"]), 45.0);
        let mut n = constant("HHN", 0.0, 10, 1.0);
        n.deltat = 0.5;
        assert_eq!(
            ps[0].apply(&[constant("HHE", 0.0, 10, 1.0), n]),
            Err(TraceError::SamplingMismatch)
        );
    }
}
