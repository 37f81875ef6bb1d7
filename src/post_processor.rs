use std::{
    f64::consts::PI,
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use tracing::info;

use crate::{
    datatypes::{Element, Node},
    error::{CemflowError, Result},
    stats,
};

pub const DEFAULT_GRID_POINTS: usize = 200;
pub const DEFAULT_GRID_CUT: f64 = 3.0;

/// Gaussian kernel density estimate with Scott's bandwidth
#[derive(Debug, Clone)]
pub struct GaussianKde {
    samples: Vec<f64>,
    bandwidth: f64,
}

impl GaussianKde {
    pub fn new(samples: &[f64]) -> Result<GaussianKde> {
        if samples.len() < 2 {
            return Err(CemflowError::PostProcessor(format!(
                "Density estimate needs at least two samples, got {}",
                samples.len()
            )));
        }

        let spread = stats::sample_std_dev(samples).unwrap_or(0.0);
        if spread.is_nan() || spread <= 0.0 {
            return Err(CemflowError::PostProcessor(
                "Density estimate is undefined for samples without spread".to_owned(),
            ));
        }

        Ok(GaussianKde {
            samples: samples.to_vec(),
            bandwidth: spread * (samples.len() as f64).powf(-0.2),
        })
    }

    pub fn bandwidth(&self) -> f64 {
        self.bandwidth
    }

    /// Evaluates the estimated density at `x`
    pub fn density(&self, x: f64) -> f64 {
        let norm = 1.0 / (self.samples.len() as f64 * self.bandwidth * (2.0 * PI).sqrt());
        let kernel_sum: f64 = self
            .samples
            .iter()
            .map(|sample| {
                let z = (x - sample) / self.bandwidth;
                (-0.5 * z * z).exp()
            })
            .sum();
        norm * kernel_sum
    }

    /// Evaluates the density on `points` evenly spaced values reaching
    /// `cut` bandwidths past the extreme samples
    ///
    /// # Returns
    /// `(x, density)` pairs in ascending `x`
    pub fn grid(&self, points: usize, cut: f64) -> Result<Vec<(f64, f64)>> {
        if points < 2 {
            return Err(CemflowError::PostProcessor(
                "Density grid needs at least two points".to_owned(),
            ));
        }

        let min = self.samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = self.samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let start = min - cut * self.bandwidth;
        let step = (max + cut * self.bandwidth - start) / (points - 1) as f64;

        Ok((0..points)
            .map(|i| {
                let x = start + step * i as f64;
                (x, self.density(x))
            })
            .collect())
    }
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(|err| CemflowError::io(path, err))
}

fn write_line(writer: &mut impl Write, path: &Path, line: &str) -> Result<()> {
    writeln!(writer, "{line}").map_err(|err| CemflowError::io(path, err))
}

fn finish(mut writer: BufWriter<File>, path: &Path) -> Result<()> {
    writer.flush().map_err(|err| CemflowError::io(path, err))
}

/// Writes posterior predictive samples as `index,sample`
pub fn samples_csv_output(samples: &[f64], output: &Path) -> Result<()> {
    let mut file = create(output)?;
    write_line(&mut file, output, "index,sample")?;
    for (index, sample) in samples.iter().enumerate() {
        write_line(&mut file, output, &format!("{index},{sample}"))?;
    }
    finish(file, output)?;

    info!("wrote {} samples to {}", samples.len(), output.display());
    Ok(())
}

/// Writes a density grid as `x,density`
pub fn kde_csv_output(grid: &[(f64, f64)], output: &Path) -> Result<()> {
    let mut file = create(output)?;
    write_line(&mut file, output, "x,density")?;
    for (x, density) in grid {
        write_line(&mut file, output, &format!("{x},{density}"))?;
    }
    finish(file, output)?;

    info!("wrote density grid to {}", output.display());
    Ok(())
}

/// Writes simulation results to two CSV files
///
/// # Arguments
/// * `elements` - The post-solve elements
/// * `nodes` - The post-solve nodes
/// * `nodes_output` - Path of the output nodes csv
/// * `elements_output` - Path of the output elements csv
pub fn csv_output(
    elements: &[Element],
    nodes: &[Node],
    nodes_output: &Path,
    elements_output: &Path,
) -> Result<()> {
    let unsolved = || CemflowError::PostProcessor("Model has not been solved".to_owned());

    let mut nodes_file = create(nodes_output)?;
    write_line(&mut nodes_file, nodes_output, "x,y,ux,uy,fx,fy")?;
    for node in nodes {
        let line = format!(
            "{x},{y},{ux},{uy},{fx},{fy}",
            x = node.vertex.x,
            y = node.vertex.y,
            ux = node.ux.ok_or_else(unsolved)?,
            uy = node.uy.ok_or_else(unsolved)?,
            fx = node.fx.ok_or_else(unsolved)?,
            fy = node.fy.ok_or_else(unsolved)?,
        );
        write_line(&mut nodes_file, nodes_output, &line)?;
    }
    finish(nodes_file, nodes_output)?;

    let mut elements_file = create(elements_output)?;
    write_line(&mut elements_file, elements_output, "n0,n1,n2,sxx,syy,sxy")?;
    for element in elements {
        let [sxx, syy, sxy] = element.stress.ok_or_else(unsolved)?;
        let line = format!(
            "{n0},{n1},{n2},{sxx},{syy},{sxy}",
            n0 = element.nodes[0],
            n1 = element.nodes[1],
            n2 = element.nodes[2],
        );
        write_line(&mut elements_file, elements_output, &line)?;
    }
    finish(elements_file, elements_output)?;

    info!(
        "wrote output to {} and {}",
        nodes_output.display(),
        elements_output.display()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::Vertex;

    #[test]
    fn test_kde_rejects_degenerate_samples() {
        assert!(GaussianKde::new(&[1.0]).is_err());
        assert!(GaussianKde::new(&[2.0, 2.0, 2.0]).is_err());
    }

    #[test]
    fn test_kde_bandwidth_follows_scott() {
        let kde = GaussianKde::new(&[1.0, 2.0, 3.0]).unwrap();
        let expected = 1.0 * 3.0_f64.powf(-0.2);
        assert!((kde.bandwidth() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_kde_integrates_to_one() {
        let kde = GaussianKde::new(&[29.6, 30.1, 30.2, 30.53, 30.8]).unwrap();
        let grid = kde.grid(2000, 6.0).unwrap();
        let step = grid[1].0 - grid[0].0;
        let area: f64 = grid.iter().map(|(_, d)| d * step).sum();
        assert!((area - 1.0).abs() < 1e-3, "area {area}");
    }

    #[test]
    fn test_kde_grid_is_symmetric_for_symmetric_samples() {
        let kde = GaussianKde::new(&[-1.0, 0.0, 1.0]).unwrap();
        let grid = kde.grid(DEFAULT_GRID_POINTS + 1, DEFAULT_GRID_CUT).unwrap();
        assert_eq!(grid.len(), DEFAULT_GRID_POINTS + 1);
        let (first, last) = (grid[0], grid[grid.len() - 1]);
        assert!((first.0 + last.0).abs() < 1e-9);
        assert!((first.1 - last.1).abs() < 1e-12);
        assert!(kde.grid(1, 3.0).is_err());
    }

    #[test]
    fn test_samples_csv_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples.csv");
        samples_csv_output(&[1.5, 2.5], &path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "index,sample\n0,1.5\n1,2.5\n");
    }

    #[test]
    fn test_csv_output_requires_solved_model() {
        let dir = tempfile::tempdir().unwrap();
        let nodes = vec![Node {
            vertex: Vertex { x: 0.0, y: 0.0 },
            ux: Some(0.0),
            uy: None,
            fx: Some(1.0),
            fy: Some(0.0),
        }];
        let result = csv_output(
            &[],
            &nodes,
            &dir.path().join("nodes.csv"),
            &dir.path().join("elements.csv"),
        );
        assert!(matches!(result, Err(CemflowError::PostProcessor(_))));
    }

    #[test]
    fn test_csv_output_writes_fields() {
        let dir = tempfile::tempdir().unwrap();
        let nodes = vec![Node {
            vertex: Vertex { x: 1.0, y: 2.0 },
            ux: Some(0.5),
            uy: Some(-0.5),
            fx: Some(0.0),
            fy: Some(3.0),
        }];
        let elements = vec![Element {
            nodes: [0, 0, 0],
            stress: Some([1.0, 2.0, 3.0]),
        }];
        let nodes_path = dir.path().join("nodes.csv");
        let elements_path = dir.path().join("elements.csv");
        csv_output(&elements, &nodes, &nodes_path, &elements_path).unwrap();

        assert_eq!(
            std::fs::read_to_string(nodes_path).unwrap(),
            "x,y,ux,uy,fx,fy\n1,2,0.5,-0.5,0,3\n"
        );
        assert_eq!(
            std::fs::read_to_string(elements_path).unwrap(),
            "n0,n1,n2,sxx,syy,sxy\n0,0,0,1,2,3\n"
        );
    }
}
