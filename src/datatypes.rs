#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub x: f64,
    pub y: f64,
}

/// A mesh node. Each axis carries either a known displacement or a known
/// force before the solve; both are filled in afterwards.
#[derive(Debug, Clone)]
pub struct Node {
    pub vertex: Vertex,
    pub ux: Option<f64>,
    pub uy: Option<f64>,
    pub fx: Option<f64>,
    pub fy: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct Element {
    pub nodes: [usize; 3],
    /// `(sxx, syy, sxy)` after the solve
    pub stress: Option<[f64; 3]>,
}

/// Material and section properties for a single solve
#[derive(Debug, Clone, Copy)]
pub struct ModelMetadata {
    /// N/mm^2
    pub youngs_modulus: f64,
    pub poisson_ratio: f64,
    /// mm
    pub part_thickness: f64,
}

/// Beam dimensions (mm), mesh density and imposed midspan displacement (mm)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeamGeometry {
    pub length: f64,
    pub height: f64,
    pub part_thickness: f64,
    pub elements_x: usize,
    pub elements_y: usize,
    pub load_displacement: f64,
}

impl Default for BeamGeometry {
    fn default() -> Self {
        BeamGeometry {
            length: 2000.0,
            height: 300.0,
            part_thickness: 150.0,
            elements_x: 40,
            elements_y: 6,
            load_displacement: 5.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BoundaryRegion {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl BoundaryRegion {
    pub fn contains(&self, vertex: &Vertex) -> bool {
        vertex.x > self.x_min && vertex.x < self.x_max && vertex.y > self.y_min && vertex.y < self.y_max
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BoundaryTarget {
    pub ux: Option<f64>,
    pub uy: Option<f64>,
    pub fx: Option<f64>,
    pub fy: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct BoundaryRule {
    pub name: String,
    pub region: BoundaryRegion,
    pub target: BoundaryTarget,
}

/// Everything needed to mesh and constrain a beam
#[derive(Debug, Clone)]
pub struct BeamSetup {
    pub geometry: BeamGeometry,
    pub boundary_rules: Vec<BoundaryRule>,
}
