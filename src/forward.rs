//! Forward solvers map a calibrated parameter and a fixed known input to a
//! scalar response.

use tracing::debug;

use crate::{
    datatypes::{BeamSetup, Element, ModelMetadata, Node, Vertex},
    error::{CemflowError, Result},
    mesher, solver,
    units::UnitRegistry,
};

pub trait ForwardSolver {
    /// Evaluates the model for one parameter value
    fn solve(&self, parameter: f64, known_input: f64) -> Result<f64>;
}

impl<F> ForwardSolver for F
where
    F: Fn(f64, f64) -> Result<f64>,
{
    fn solve(&self, parameter: f64, known_input: f64) -> Result<f64> {
        self(parameter, known_input)
    }
}

/// Finite element model of a displacement-controlled three point bending
/// test on a concrete beam.
///
/// The parameter is Young's modulus in kN/mm^2, the known input is the
/// Poisson ratio. The response is the bending stress `sxx` at the bottom of
/// midspan in N/mm^2.
#[derive(Debug, Clone)]
pub struct ThreePointBending {
    registry: UnitRegistry,
    setup: BeamSetup,
}

impl ThreePointBending {
    pub fn new(registry: UnitRegistry, setup: BeamSetup) -> Result<ThreePointBending> {
        mesher::validate_geometry(&setup.geometry)?;
        Ok(ThreePointBending { registry, setup })
    }

    pub fn setup(&self) -> &BeamSetup {
        &self.setup
    }

    /// Meshes and solves the beam, returning the solved fields
    ///
    /// # Arguments
    /// * `youngs_modulus` - Young's modulus in kN/mm^2
    /// * `poisson_ratio` - Dimensionless Poisson ratio
    pub fn solve_fields(
        &self,
        youngs_modulus: f64,
        poisson_ratio: f64,
    ) -> Result<(Vec<Node>, Vec<Element>)> {
        let youngs_modulus = self.registry.quantity(youngs_modulus, "kN/mm^2")?;
        let poisson_ratio = self.registry.quantity(poisson_ratio, "")?;

        let model_metadata = ModelMetadata {
            youngs_modulus: self.registry.magnitude_in(&youngs_modulus, "N/mm^2")?,
            poisson_ratio: self.registry.magnitude_in(&poisson_ratio, "")?,
            part_thickness: self.setup.geometry.part_thickness,
        };

        let (mut nodes, mut elements) = mesher::run(&self.setup)?;
        solver::run(&mut nodes, &mut elements, &model_metadata)?;

        Ok((nodes, elements))
    }
}

impl ForwardSolver for ThreePointBending {
    fn solve(&self, parameter: f64, known_input: f64) -> Result<f64> {
        let (nodes, elements) = self.solve_fields(parameter, known_input)?;
        let sensor = Vertex {
            x: 0.5 * self.setup.geometry.length,
            y: 0.0,
        };
        let stress = stress_at(&nodes, &elements, &sensor)?;
        debug!("E = {parameter} kN/mm^2, nu = {known_input} -> sxx = {stress} N/mm^2");
        Ok(stress)
    }
}

/// Mean `sxx` of the elements sharing the node closest to `point`
pub fn stress_at(nodes: &[Node], elements: &[Element], point: &Vertex) -> Result<f64> {
    let distance =
        |v: &Vertex| f64::powi(v.x - point.x, 2) + f64::powi(v.y - point.y, 2);

    let closest = nodes
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| distance(&a.vertex).total_cmp(&distance(&b.vertex)))
        .map(|(i, _)| i)
        .ok_or_else(|| CemflowError::Solver("Cannot read stress from an empty mesh".to_owned()))?;

    let stresses: Vec<f64> = elements
        .iter()
        .filter(|e| e.nodes.contains(&closest))
        .map(|e| {
            e.stress.map(|s| s[0]).ok_or_else(|| {
                CemflowError::Solver(format!("Element {:?} has no stress", e.nodes))
            })
        })
        .collect::<Result<Vec<f64>>>()?;

    if stresses.is_empty() {
        return Err(CemflowError::Solver(format!(
            "No element touches node {closest}"
        )));
    }

    Ok(stresses.iter().sum::<f64>() / stresses.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::BeamGeometry;

    fn small_beam() -> ThreePointBending {
        let geometry = BeamGeometry {
            length: 400.0,
            height: 40.0,
            part_thickness: 20.0,
            elements_x: 20,
            elements_y: 4,
            load_displacement: 1.0,
        };
        let setup = BeamSetup {
            geometry,
            boundary_rules: mesher::three_point_bending_rules(&geometry),
        };
        ThreePointBending::new(UnitRegistry::new(), setup).unwrap()
    }

    #[test]
    fn test_closure_is_a_forward_solver() {
        let linear = |p: f64, k: f64| -> Result<f64> { Ok(2.0 * p + k) };
        assert_eq!(linear.solve(3.0, 1.0).unwrap(), 7.0);
    }

    #[test]
    fn test_bottom_midspan_is_in_tension() {
        let beam = small_beam();
        let stress = beam.solve(30.0, 0.2).unwrap();
        assert!(stress > 0.0, "expected tension, got {stress}");
    }

    #[test]
    fn test_stress_is_linear_in_youngs_modulus() {
        let beam = small_beam();
        let low = beam.solve(30.0, 0.2).unwrap();
        let high = beam.solve(60.0, 0.2).unwrap();
        assert!((high / low - 2.0).abs() < 1e-4, "ratio {}", high / low);
    }

    #[test]
    fn test_invalid_poisson_ratio_fails() {
        let beam = small_beam();
        assert!(beam.solve(30.0, 0.7).is_err());
    }

    #[test]
    fn test_stress_at_empty_mesh_fails() {
        let point = Vertex { x: 0.0, y: 0.0 };
        assert!(stress_at(&[], &[], &point).is_err());
    }
}
