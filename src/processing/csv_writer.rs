use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::physics::SolutionVariable;
use crate::region::Region;
use crate::solver::OperatingPoint;

/// Write data to CSV file with headers
pub fn write_csv<P: AsRef<Path>>(path: P, headers: &[&str], data: &[Vec<f64>]) -> io::Result<()> {
    if !headers.is_empty() && !data.is_empty() && headers.len() != data.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "Headers count ({}) doesn't match data columns ({})",
                headers.len(),
                data.len()
            ),
        ));
    }

    let mut file = File::create(path)?;

    writeln!(file, "{}", headers.join(","))?;

    let n_rows = data.iter().map(|col| col.len()).max().unwrap_or(0);

    for i in 0..n_rows {
        let row: Vec<String> = data
            .iter()
            .map(|col| {
                if i < col.len() {
                    format!("{:.15e}", col[i])
                } else {
                    String::new()
                }
            })
            .collect();
        writeln!(file, "{}", row.join(","))?;
    }

    Ok(())
}

/// Terminal potentials and currents of every electrode, one row per
/// operating point. `first` names the leading column (`V_applied`, `time`).
pub fn write_operating_points<P: AsRef<Path>>(path: P, first: &str, points: &[OperatingPoint]) -> io::Result<()> {
    let Some(head) = points.first() else {
        return write_csv(path, &[first], &[Vec::new()]);
    };
    let mut headers = vec![first.to_string()];
    let mut columns = vec![points.iter().map(|p| p.applied).collect::<Vec<f64>>()];
    for e in &head.electrodes {
        headers.push(format!("V_{}", e.label));
        headers.push(format!("I_{}", e.label));
        let sample = |p: &OperatingPoint| p.electrode(&e.label).cloned();
        columns.push(points.iter().map(|p| sample(p).map_or(f64::NAN, |s| s.potential)).collect());
        columns.push(points.iter().map(|p| sample(p).map_or(f64::NAN, |s| s.current)).collect());
    }
    let headers: Vec<&str> = headers.iter().map(String::as_str).collect();
    write_csv(path, &headers, &columns)
}

/// Node values of one region along x: position, then every solved
/// variable present in the region.
pub fn write_region_profile<P: AsRef<Path>>(path: P, region: &Region) -> io::Result<()> {
    let state = &region.state;
    let mut headers = vec!["x"];
    let mut columns = vec![state.nodes.iter().map(|n| n.position.x).collect::<Vec<f64>>()];
    for var in state.layout.variables() {
        headers.push(match var {
            SolutionVariable::Potential => "psi",
            SolutionVariable::Electron => "n",
            SolutionVariable::Hole => "p",
            SolutionVariable::Temperature => "T",
            SolutionVariable::ElectronTemperature => "Tn",
            SolutionVariable::HoleTemperature => "Tp",
        });
        columns.push(
            state
                .data
                .iter()
                .map(|d| match var {
                    SolutionVariable::ElectronTemperature => d.tn,
                    SolutionVariable::HoleTemperature => d.tp,
                    _ => d.value(var),
                })
                .collect(),
        );
    }
    write_csv(path, &headers, &columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::ElectrodeSample;
    use std::fs;

    #[test]
    fn test_write_csv() {
        let path = std::env::temp_dir().join("vfvm_test_output.csv");
        let headers = &["x", "y", "z"];
        let data = vec![
            vec![1.0, 2.0, 3.0],
            vec![4.0, 5.0, 6.0],
            vec![7.0, 8.0, 9.0],
        ];

        write_csv(&path, headers, &data).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("x,y,z"));

        fs::remove_file(&path).ok();
    }

    #[test]
    fn operating_points_get_one_column_pair_per_electrode() {
        let path = std::env::temp_dir().join("vfvm_test_iv.csv");
        let point = |v: f64| OperatingPoint {
            time: 0.0,
            applied: v,
            electrodes: vec![
                ElectrodeSample {
                    label: "anode".into(),
                    potential: v,
                    current: 1e-3 * v,
                },
                ElectrodeSample {
                    label: "cathode".into(),
                    potential: 0.0,
                    current: -1e-3 * v,
                },
            ],
        };
        write_operating_points(&path, "V_applied", &[point(0.0), point(0.5)]).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some("V_applied,V_anode,I_anode,V_cathode,I_cathode"));
        assert_eq!(lines.count(), 2);

        fs::remove_file(&path).ok();
    }
}
