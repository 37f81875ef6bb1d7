use crate::{
    datatypes::{Element, ModelMetadata, Node},
    error::{CemflowError, Result},
};
use nalgebra::{matrix, DVector, SMatrix};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use tracing::{debug, trace, warn};

use argmin::{
    core::{
        observers::{Observe, ObserverMode},
        Error, Executor, Operator, State, KV,
    },
    solver::conjugategradient::ConjugateGradient,
};

pub const DOF: usize = 2;
/// Conjugate gradient iteration cap, per unknown
pub const CG_ITER_PER_UNKNOWN: u64 = 20;
/// Residual norm target relative to the right hand side
pub const RELATIVE_CG_TOLERANCE: f64 = 1e-10;

/// Sparse matrix-vector product
fn csr_mul(a: &CsrMatrix<f64>, x: &[f64]) -> Vec<f64> {
    let product: DVector<f64> = a * &DVector::from_column_slice(x);
    product.as_slice().to_vec()
}

/// Runs multiplication for Conjugate Gradient Solver
struct ConjugateGradientOperator<'a> {
    a: &'a CsrMatrix<f64>,
}

impl<'a> Operator for ConjugateGradientOperator<'a> {
    type Param = Vec<f64>;
    type Output = Vec<f64>;

    fn apply(&self, x: &Self::Param) -> std::result::Result<Self::Output, Error> {
        Ok(csr_mul(self.a, x))
    }
}

/// Traces the residual of each conjugate gradient iteration
struct ConjugateGradientTracer;

impl<I> Observe<I> for ConjugateGradientTracer
where
    I: State,
{
    fn observe_init(&mut self, name: &str, _state: &I, _kv: &KV) -> std::result::Result<(), Error> {
        trace!("starting {name}");
        Ok(())
    }

    fn observe_iter(&mut self, state: &I, _kv: &KV) -> std::result::Result<(), Error> {
        trace!(iter = state.get_iter(), cost = ?state.get_cost(), "conjugate gradient");
        Ok(())
    }

    fn observe_final(&mut self, state: &I) -> std::result::Result<(), Error> {
        trace!(iters = state.get_iter(), "conjugate gradient finished");
        Ok(())
    }
}

/// Solves a system of equations using the conjugate gradient method.
///
/// This function returns an approximation for x in `Ax=b`
///
/// # Arguments
/// * `a` - A square symmetric positive definite matrix
/// * `b` - The right hand side of the system
///
/// # Returns
/// A vector that represents `x` from the system
fn run_conjugate_gradient(a: &CsrMatrix<f64>, b: &[f64]) -> Result<Vec<f64>> {
    let b_norm = b.iter().map(|v| v * v).sum::<f64>().sqrt();
    if b_norm == 0.0 {
        return Ok(vec![0.0; b.len()]);
    }

    let target_cost = RELATIVE_CG_TOLERANCE * b_norm;
    let max_iters = CG_ITER_PER_UNKNOWN * b.len() as u64;

    let solver: ConjugateGradient<_, f64> = ConjugateGradient::new(b.to_vec());
    let initial_guess: Vec<f64> = vec![0.0; b.len()];
    let operator = ConjugateGradientOperator { a };

    let res = Executor::new(operator, solver)
        .configure(|state| {
            state
                .param(initial_guess)
                .max_iters(max_iters)
                .target_cost(target_cost)
        })
        .add_observer(ConjugateGradientTracer, ObserverMode::Always)
        .run()
        .map_err(|err| CemflowError::Solver(format!("Conjugate Gradient error: {err}")))?;

    let state = res.state();
    let best_cost = state.get_best_cost();
    if !(best_cost <= target_cost) {
        warn!(
            "conjugate gradient stopped after {} iterations at residual {best_cost:e} (target {target_cost:e})",
            state.get_iter()
        );
    } else {
        debug!("conjugate gradient converged in {} iterations", state.get_iter());
    }

    let best_param = state.best_param.clone().ok_or_else(|| {
        CemflowError::Solver("Conjugate Gradient could not produce best parameter".to_owned())
    })?;

    if best_param.iter().any(|v| !v.is_finite()) {
        return Err(CemflowError::Solver(
            "Conjugate Gradient produced a non-finite displacement".to_owned(),
        ));
    }

    Ok(best_param)
}

/// Calculates the area of the element
///
/// # Arguments
/// * `element` - The Element to target
/// * `nodes` - A reference to the vector of nodes
///
/// # Returns
/// The signed area of the element; positive for counter-clockwise nodes
pub fn compute_element_area(element: &Element, nodes: &[Node]) -> f64 {
    let v0 = &nodes[element.nodes[0]].vertex;
    let v1 = &nodes[element.nodes[1]].vertex;
    let v2 = &nodes[element.nodes[2]].vertex;

    0.5 * (v0.x * (v1.y - v2.y) + v1.x * (v2.y - v0.y) + v2.x * (v0.y - v1.y))
}

/// Calculates the strain-displacement matrix of the element
///
/// # Arguments
/// * `element` - The Element to target
/// * `nodes` - A reference to the vector of nodes
/// * `element_area` - The area of the element
///
/// # Returns
/// A 3x6 strain-displacement matrix
pub fn compute_strain_displacement_matrix(
    element: &Element,
    nodes: &[Node],
    element_area: f64,
) -> SMatrix<f64, 3, 6> {
    let v0 = &nodes[element.nodes[0]].vertex;
    let v1 = &nodes[element.nodes[1]].vertex;
    let v2 = &nodes[element.nodes[2]].vertex;

    let beta_1 = v1.y - v2.y;
    let beta_2 = v2.y - v0.y;
    let beta_3 = v0.y - v1.y;

    let gamma_1 = v2.x - v1.x;
    let gamma_2 = v0.x - v2.x;
    let gamma_3 = v1.x - v0.x;

    let mut strain_displacement_mat: SMatrix<f64, 3, 6> = matrix![
        beta_1, 0., beta_2, 0., beta_3, 0.;
        0., gamma_1, 0., gamma_2, 0., gamma_3;
        gamma_1, beta_1, gamma_2, beta_2, gamma_3, beta_3;
    ];

    strain_displacement_mat /= 2.0 * element_area;

    strain_displacement_mat
}

/// Calculates the plane stress stress-strain matrix
///
/// # Arguments
/// * `poisson_ratio` - The poisson ratio for the model
/// * `youngs_modulus` - The modulus of elasticity of the model
///
/// # Returns
/// A 3x3 stress-strain matrix
pub fn compute_stress_strain_matrix(poisson_ratio: f64, youngs_modulus: f64) -> SMatrix<f64, 3, 3> {
    let mut stress_strain_mat: SMatrix<f64, 3, 3> = matrix![
        1.0, poisson_ratio, 0.0;
        poisson_ratio, 1.0, 0.0;
        0.0, 0.0, (1.0 - poisson_ratio)/2.0;
    ];

    stress_strain_mat *= youngs_modulus / (1.0 - f64::powi(poisson_ratio, 2));

    stress_strain_mat
}

/// Computes the stiffness matrix for a given element
///
/// # Arguments
/// * `element` - The element to target
/// * `nodes` - A reference to the vector of nodes
/// * `model_metadata` - Material and section properties
///
/// # Returns
/// A 6x6 stiffness matrix for the element
fn compute_element_stiffness_matrix(
    element: &Element,
    nodes: &[Node],
    model_metadata: &ModelMetadata,
) -> Result<SMatrix<f64, 6, 6>> {
    let element_area = compute_element_area(element, nodes);
    if element_area <= 0.0 {
        return Err(CemflowError::Mesher(format!(
            "Element {:?} is degenerate or clockwise (area {element_area})",
            element.nodes
        )));
    }

    let stress_strain_mat =
        compute_stress_strain_matrix(model_metadata.poisson_ratio, model_metadata.youngs_modulus);
    let strain_displacement_mat = compute_strain_displacement_matrix(element, nodes, element_area);

    Ok((strain_displacement_mat.transpose() * stress_strain_mat)
        * strain_displacement_mat
        * element_area
        * model_metadata.part_thickness)
}

/// Compiles element stiffness matrices into a sparse total stiffness matrix
///
/// # Arguments
/// * `nodes` - A reference to the vector of nodes
/// * `elements` - A reference to the vector of elements
/// * `element_stiffness_matrices` - Element stiffness matrices that
///     correspond to the `elements` vector
fn build_total_stiffness_matrix(
    nodes: &[Node],
    elements: &[Element],
    element_stiffness_matrices: &[SMatrix<f64, 6, 6>],
) -> CsrMatrix<f64> {
    let size = DOF * nodes.len();
    let mut triplets = CooMatrix::new(size, size);

    for (stiffness_mat, element) in element_stiffness_matrices.iter().zip(elements) {
        for (local_row, node_row) in element.nodes.iter().enumerate() {
            for (local_col, node_col) in element.nodes.iter().enumerate() {
                for (dr, dc) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
                    triplets.push(
                        node_row * DOF + dr,
                        node_col * DOF + dc,
                        stiffness_mat[(local_row * DOF + dr, local_col * DOF + dc)],
                    );
                }
            }
        }
    }

    // duplicate entries are summed during conversion
    CsrMatrix::from(&triplets)
}

/// Creates nodal forces and nodal displacement column vectors
///
/// # Returns
/// The nodal forces and nodal displacements column vectors, in that order
fn build_col_vecs(nodes: &[Node]) -> (Vec<Option<f64>>, Vec<Option<f64>>) {
    let mut nodal_forces: Vec<Option<f64>> = Vec::with_capacity(nodes.len() * DOF);
    let mut nodal_displacements: Vec<Option<f64>> = Vec::with_capacity(nodes.len() * DOF);

    for node in nodes {
        nodal_forces.push(node.fx);
        nodal_forces.push(node.fy);
        nodal_displacements.push(node.ux);
        nodal_displacements.push(node.uy);
    }

    (nodal_forces, nodal_displacements)
}

/// Solves for the displacements in the nodes. Loads displacements and
/// forces (including reactions) into the node objects
///
/// # Arguments
/// * `nodes` - The vector of nodes
/// * `total_stiffness_matrix` - The total stiffness matrix of the model
fn solve(nodes: &mut [Node], total_stiffness_matrix: &CsrMatrix<f64>) -> Result<()> {
    let (nodal_forces, nodal_displacements) = build_col_vecs(nodes);

    // Number the unknown displacements
    let mut free_index: Vec<Option<usize>> = vec![None; nodal_displacements.len()];
    let mut num_free = 0;
    for (dof, (force, displacement)) in nodal_forces.iter().zip(&nodal_displacements).enumerate() {
        match (force, displacement) {
            (Some(_), None) => {
                free_index[dof] = Some(num_free);
                num_free += 1;
            }
            (None, Some(_)) => {}
            (None, None) => {
                return Err(CemflowError::Solver(format!(
                    "Degree of freedom {dof} is under-constrained"
                )))
            }
            (Some(_), Some(_)) => {
                return Err(CemflowError::Solver(format!(
                    "Degree of freedom {dof} is over-constrained"
                )))
            }
        }
    }
    if num_free == 0 {
        return Err(CemflowError::Solver(
            "Model has no unknown displacements".to_owned(),
        ));
    }

    // Reduce to K_ff u_f = f_f - K_fp u_p
    let mut reduced = CooMatrix::new(num_free, num_free);
    let mut rhs = vec![0.0; num_free];
    for (row, row_values) in total_stiffness_matrix.row_iter().enumerate() {
        let (Some(r), Some(force)) = (free_index[row], nodal_forces[row]) else {
            continue;
        };
        rhs[r] += force;

        for (&col, &k) in row_values.col_indices().iter().zip(row_values.values()) {
            match (free_index[col], nodal_displacements[col]) {
                (Some(c), _) => reduced.push(r, c, k),
                (None, Some(u)) => rhs[r] -= k * u,
                (None, None) => {}
            }
        }
    }
    let reduced = CsrMatrix::from(&reduced);

    debug!("solving for {num_free} unknown displacements");
    let start = std::time::Instant::now();
    let solution = run_conjugate_gradient(&reduced, &rhs)?;
    debug!(
        "solved system in {:.3} seconds",
        start.elapsed().as_secs_f32()
    );

    let displacements: Vec<f64> = nodal_displacements
        .iter()
        .enumerate()
        .map(|(dof, u)| match (u, free_index[dof]) {
            (Some(u), _) => *u,
            (None, Some(f)) => solution[f],
            (None, None) => 0.0,
        })
        .collect();

    // Known forces stay as given; reactions come from K u
    let internal_forces = csr_mul(total_stiffness_matrix, &displacements);
    let forces: Vec<f64> = nodal_forces
        .iter()
        .zip(&internal_forces)
        .map(|(known, solved)| known.unwrap_or(*solved))
        .collect();

    for (i, node) in nodes.iter_mut().enumerate() {
        node.ux = Some(displacements[DOF * i]);
        node.uy = Some(displacements[DOF * i + 1]);
        node.fx = Some(forces[DOF * i]);
        node.fy = Some(forces[DOF * i + 1]);
    }

    Ok(())
}

/// Calculates the stress in each element
///
/// # Arguments
/// * `elements` - A mutable reference to the vector of elements
/// * `nodes` - The solved nodes
/// * `model_metadata` - Material properties
fn compute_stress(
    elements: &mut [Element],
    nodes: &[Node],
    model_metadata: &ModelMetadata,
) -> Result<()> {
    let stress_strain_mat =
        compute_stress_strain_matrix(model_metadata.poisson_ratio, model_metadata.youngs_modulus);

    for element in elements {
        let mut nodal_displacements = [0.0; DOF * 3];
        for (local, &node_idx) in element.nodes.iter().enumerate() {
            let node = &nodes[node_idx];
            let (Some(ux), Some(uy)) = (node.ux, node.uy) else {
                return Err(CemflowError::Solver(format!(
                    "Node {node_idx} has no displacement after solve"
                )));
            };
            nodal_displacements[DOF * local] = ux;
            nodal_displacements[DOF * local + 1] = uy;
        }

        let displacement_mat: SMatrix<f64, { DOF * 3 }, 1> = SMatrix::from(nodal_displacements);

        let stress = stress_strain_mat
            * compute_strain_displacement_matrix(
                element,
                nodes,
                compute_element_area(element, nodes),
            )
            * displacement_mat;

        element.stress = Some([stress[0], stress[1], stress[2]]);
    }

    Ok(())
}

fn validate_metadata(model_metadata: &ModelMetadata) -> Result<()> {
    if !(model_metadata.youngs_modulus > 0.0) {
        return Err(CemflowError::Solver(format!(
            "Young's modulus must be positive, got {}",
            model_metadata.youngs_modulus
        )));
    }
    if !(0.0..0.5).contains(&model_metadata.poisson_ratio) {
        return Err(CemflowError::Solver(format!(
            "Poisson ratio must be within [0, 0.5), got {}",
            model_metadata.poisson_ratio
        )));
    }
    if !(model_metadata.part_thickness > 0.0) {
        return Err(CemflowError::Solver(format!(
            "Part thickness must be positive, got {}",
            model_metadata.part_thickness
        )));
    }
    Ok(())
}

/// Runs the solver. Updates values on nodes and elements vectors
///
/// # Arguments
/// * `nodes` - A mutable reference to the vector of nodes
/// * `elements` - A mutable reference to the vector of elements
/// * `model_metadata` - The model metadata
pub fn run(
    nodes: &mut [Node],
    elements: &mut [Element],
    model_metadata: &ModelMetadata,
) -> Result<()> {
    validate_metadata(model_metadata)?;

    let element_stiffness_matrices = elements
        .iter()
        .map(|element| compute_element_stiffness_matrix(element, nodes, model_metadata))
        .collect::<Result<Vec<SMatrix<f64, 6, 6>>>>()?;
    debug!(
        "built {} element stiffness matrices",
        element_stiffness_matrices.len()
    );

    let total_stiffness_matrix =
        build_total_stiffness_matrix(nodes, elements, &element_stiffness_matrices);

    solve(nodes, &total_stiffness_matrix)?;

    compute_stress(elements, nodes, model_metadata)
}
