use std::path::Path;

use json::JsonValue;
use tracing::{debug, info, warn};

use crate::{
    datatypes::{
        BeamGeometry, BeamSetup, BoundaryRegion, BoundaryRule, BoundaryTarget, Element, Node,
        Vertex,
    },
    error::{CemflowError, Result},
};

/// Parses the input json into a JsonValue object
///
/// # Arguments
/// * `input_file` - The path to the input file
///
/// # Returns
/// A JsonValue object
pub fn load_input_file(input_file: &Path) -> Result<JsonValue> {
    let file_string = std::fs::read_to_string(input_file).map_err(|err| {
        CemflowError::Input(format!(
            "Unable to open input file {}: {err}",
            input_file.display()
        ))
    })?;

    let input_file_json = json::parse(&file_string)
        .map_err(|err| CemflowError::Input(format!("Error in input file json: {err}")))?;

    if !input_file_json.has_key("metadata") {
        return Err(CemflowError::Input(
            "Input json missing metadata field".to_string(),
        ));
    }
    for field in ["length", "height", "part_thickness", "elements_x", "elements_y"] {
        if !input_file_json["metadata"].has_key(field) {
            return Err(CemflowError::Input(format!(
                "Input json missing {field} field in metadata section"
            )));
        }
    }

    Ok(input_file_json)
}

/// Parses the beam geometry from the input json
///
/// # Arguments
/// * `input_json` - The input file as a JsonValue object
///
/// # Returns
/// A validated BeamGeometry instance
pub fn parse_input_metadata(input_json: &JsonValue) -> Result<BeamGeometry> {
    let metadata = &input_json["metadata"];
    let defaults = BeamGeometry::default();

    let length = metadata["length"]
        .as_f64()
        .ok_or_else(|| CemflowError::Input("Input json has a non-numeric length".to_owned()))?;
    let height = metadata["height"]
        .as_f64()
        .ok_or_else(|| CemflowError::Input("Input json has a non-numeric height".to_owned()))?;
    let part_thickness = metadata["part_thickness"].as_f64().ok_or_else(|| {
        CemflowError::Input("Input json has a non-numeric part thickness".to_owned())
    })?;
    let elements_x = metadata["elements_x"].as_usize().ok_or_else(|| {
        CemflowError::Input("Input json elements_x must be a positive integer".to_owned())
    })?;
    let elements_y = metadata["elements_y"].as_usize().ok_or_else(|| {
        CemflowError::Input("Input json elements_y must be a positive integer".to_owned())
    })?;

    let load_displacement = if metadata.has_key("load_displacement") {
        metadata["load_displacement"].as_f64().ok_or_else(|| {
            CemflowError::Input("Input json has a non-numeric load displacement".to_owned())
        })?
    } else {
        defaults.load_displacement
    };

    let geometry = BeamGeometry {
        length,
        height,
        part_thickness,
        elements_x,
        elements_y,
        load_displacement,
    };
    validate_geometry(&geometry)?;

    Ok(geometry)
}

/// Checks that the beam can be meshed with a node at top and bottom midspan
pub fn validate_geometry(geometry: &BeamGeometry) -> Result<()> {
    if !(geometry.length > 0.0 && geometry.height > 0.0 && geometry.part_thickness > 0.0) {
        return Err(CemflowError::Input(
            "Beam length, height and thickness must be positive".to_owned(),
        ));
    }
    if geometry.elements_x < 2 || geometry.elements_x % 2 != 0 {
        return Err(CemflowError::Input(format!(
            "elements_x must be an even number of at least 2, got {}",
            geometry.elements_x
        )));
    }
    if geometry.elements_y == 0 {
        return Err(CemflowError::Input(
            "elements_y must be at least 1".to_owned(),
        ));
    }
    Ok(())
}

/// Parses boundary rules from the input json
///
/// # Arguments
/// * `input_json` - The input file as a JsonValue object
///
/// # Returns
/// The validated rules, in file order
pub fn parse_boundary_conditions(input_json: &JsonValue) -> Result<Vec<BoundaryRule>> {
    let mut rules: Vec<BoundaryRule> = Vec::new();

    for (name, rule_json) in input_json["boundary_conditions"].entries() {
        if !rule_json.has_key("region") {
            return Err(CemflowError::Input(format!(
                "Boundary rule {name} is missing region field"
            )));
        }
        if !rule_json.has_key("targets") {
            return Err(CemflowError::Input(format!(
                "Boundary rule {name} is missing target field"
            )));
        }

        let mut region = BoundaryRegion {
            x_min: f64::MIN,
            x_max: f64::MAX,
            y_min: f64::MIN,
            y_max: f64::MAX,
        };
        for (key, bound) in [
            ("x_target_min", &mut region.x_min),
            ("x_target_max", &mut region.x_max),
            ("y_target_min", &mut region.y_min),
            ("y_target_max", &mut region.y_max),
        ] {
            if rule_json["region"].has_key(key) {
                *bound = rule_json["region"][key].as_f64().ok_or_else(|| {
                    CemflowError::Input(format!("Bad value for {key} in {name}"))
                })?;
            }
        }

        let target = BoundaryTarget {
            ux: rule_json["targets"]["ux"].as_f64(),
            uy: rule_json["targets"]["uy"].as_f64(),
            fx: rule_json["targets"]["fx"].as_f64(),
            fy: rule_json["targets"]["fy"].as_f64(),
        };

        let rule = BoundaryRule {
            name: name.to_string(),
            region,
            target,
        };
        validate_rule(&rule)?;
        rules.push(rule);
    }

    debug!("loaded {} boundary rules from input file", rules.len());

    Ok(rules)
}

fn validate_rule(rule: &BoundaryRule) -> Result<()> {
    let name = &rule.name;
    let (region, target) = (&rule.region, &rule.target);

    if region.x_min > region.x_max {
        return Err(CemflowError::Input(format!(
            "Boundary '{name}' has x_target_min greater than x_target_max"
        )));
    }
    if region.y_min > region.y_max {
        return Err(CemflowError::Input(format!(
            "Boundary '{name}' has y_target_min greater than y_target_max"
        )));
    }
    if target.fx.is_none() && target.ux.is_none() {
        return Err(CemflowError::Input(format!(
            "Boundary '{name}' is under-constrained in x-axis"
        )));
    }
    if target.fy.is_none() && target.uy.is_none() {
        return Err(CemflowError::Input(format!(
            "Boundary '{name}' is under-constrained in y-axis"
        )));
    }
    if target.fx.is_some() && target.ux.is_some() {
        return Err(CemflowError::Input(format!(
            "Boundary '{name}' is over-constrained in x-axis"
        )));
    }
    if target.fy.is_some() && target.uy.is_some() {
        return Err(CemflowError::Input(format!(
            "Boundary '{name}' is over-constrained in y-axis"
        )));
    }
    Ok(())
}

/// Builds the supports and the imposed displacement of a three point
/// bending test: a pin at the bottom left corner, a roller at the bottom
/// right corner and a downward displacement at top midspan.
pub fn three_point_bending_rules(geometry: &BeamGeometry) -> Vec<BoundaryRule> {
    let tol_x = 0.5 * geometry.length / geometry.elements_x as f64;
    let tol_y = 0.5 * geometry.height / geometry.elements_y as f64;
    let (length, height) = (geometry.length, geometry.height);

    let region = |x: f64, y: f64| BoundaryRegion {
        x_min: x - tol_x,
        x_max: x + tol_x,
        y_min: y - tol_y,
        y_max: y + tol_y,
    };

    vec![
        BoundaryRule {
            name: "left_support".to_owned(),
            region: region(0.0, 0.0),
            target: BoundaryTarget {
                ux: Some(0.0),
                uy: Some(0.0),
                fx: None,
                fy: None,
            },
        },
        BoundaryRule {
            name: "right_support".to_owned(),
            region: region(length, 0.0),
            target: BoundaryTarget {
                ux: None,
                uy: Some(0.0),
                fx: Some(0.0),
                fy: None,
            },
        },
        BoundaryRule {
            name: "load".to_owned(),
            region: region(0.5 * length, height),
            target: BoundaryTarget {
                ux: None,
                uy: Some(-geometry.load_displacement),
                fx: Some(0.0),
                fy: None,
            },
        },
    ]
}

/// Loads a beam setup from an input json. Without a boundary_conditions
/// section the three point bending supports are generated.
pub fn load_beam_setup(input_file: &Path) -> Result<BeamSetup> {
    let input_json = load_input_file(input_file)?;
    let geometry = parse_input_metadata(&input_json)?;

    let boundary_rules = if input_json.has_key("boundary_conditions") {
        parse_boundary_conditions(&input_json)?
    } else {
        three_point_bending_rules(&geometry)
    };

    Ok(BeamSetup {
        geometry,
        boundary_rules,
    })
}

/// Builds a structured triangle mesh of the beam. Each grid cell is split
/// into two counter-clockwise triangles with an alternating diagonal so the
/// mesh is mirror-symmetric about midspan.
///
/// # Returns
/// A tuple with a vector of nodes and a vector of elements, in that order
pub fn build_mesh(geometry: &BeamGeometry) -> Result<(Vec<Node>, Vec<Element>)> {
    validate_geometry(geometry)?;

    let (nx, ny) = (geometry.elements_x, geometry.elements_y);
    let dx = geometry.length / nx as f64;
    let dy = geometry.height / ny as f64;
    let index = |i: usize, j: usize| j * (nx + 1) + i;

    let mut nodes: Vec<Node> = Vec::with_capacity((nx + 1) * (ny + 1));
    for j in 0..=ny {
        for i in 0..=nx {
            nodes.push(Node {
                vertex: Vertex {
                    x: i as f64 * dx,
                    y: j as f64 * dy,
                },
                ux: None,
                uy: None,
                fx: Some(0.0),
                fy: Some(0.0),
            });
        }
    }

    let mut elements: Vec<Element> = Vec::with_capacity(2 * nx * ny);
    for j in 0..ny {
        for i in 0..nx {
            let (a, b, c, d) = (index(i, j), index(i + 1, j), index(i + 1, j + 1), index(i, j + 1));
            let triangles = if (i + j) % 2 == 0 {
                [[a, b, c], [a, c, d]]
            } else {
                [[a, b, d], [b, c, d]]
            };
            for nodes in triangles {
                elements.push(Element {
                    nodes,
                    stress: None,
                });
            }
        }
    }

    info!(
        "meshed beam with {} nodes and {} elements",
        nodes.len(),
        elements.len()
    );

    Ok((nodes, elements))
}

/// Applies boundary rules to a vector of nodes. Later rules win where
/// regions overlap.
///
/// # Arguments
/// * `rules` - The boundary rules
/// * `nodes` - A mutable reference to the vector of nodes
pub fn apply_boundary_conditions(rules: &[BoundaryRule], nodes: &mut [Node]) {
    for rule in rules {
        let mut matched = 0;
        for node in nodes.iter_mut().filter(|n| rule.region.contains(&n.vertex)) {
            node.ux = rule.target.ux;
            node.uy = rule.target.uy;
            node.fx = rule.target.fx;
            node.fy = rule.target.fy;
            matched += 1;
        }

        if matched == 0 {
            warn!("boundary rule '{}' does not match any node", rule.name);
        } else {
            debug!("boundary rule '{}' applied to {matched} nodes", rule.name);
        }
    }
}

/// Runs the mesher
///
/// # Arguments
/// * `setup` - The beam geometry and its boundary rules
///
/// # Returns
/// The constrained nodes and the elements
pub fn run(setup: &BeamSetup) -> Result<(Vec<Node>, Vec<Element>)> {
    let (mut nodes, elements) = build_mesh(&setup.geometry)?;
    apply_boundary_conditions(&setup.boundary_rules, &mut nodes);
    Ok((nodes, elements))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::compute_element_area;

    fn small_geometry() -> BeamGeometry {
        BeamGeometry {
            length: 100.0,
            height: 20.0,
            part_thickness: 10.0,
            elements_x: 4,
            elements_y: 2,
            load_displacement: 0.5,
        }
    }

    #[test]
    fn test_mesh_counts_and_orientation() {
        let (nodes, elements) = build_mesh(&small_geometry()).unwrap();
        assert_eq!(nodes.len(), 15);
        assert_eq!(elements.len(), 16);

        let total_area: f64 = elements
            .iter()
            .map(|e| {
                let area = compute_element_area(e, &nodes);
                assert!(area > 0.0);
                area
            })
            .sum();
        assert!((total_area - 2000.0).abs() < 1e-9);
    }

    #[test]
    fn test_odd_element_count_rejected() {
        let mut geometry = small_geometry();
        geometry.elements_x = 5;
        assert!(matches!(build_mesh(&geometry), Err(CemflowError::Input(_))));
    }

    #[test]
    fn test_three_point_bending_constraints() {
        let geometry = small_geometry();
        let setup = BeamSetup {
            geometry,
            boundary_rules: three_point_bending_rules(&geometry),
        };
        let (nodes, _) = run(&setup).unwrap();

        let fixed: Vec<&Node> = nodes.iter().filter(|n| n.uy.is_some()).collect();
        assert_eq!(fixed.len(), 3);

        let load = nodes.iter().find(|n| n.uy == Some(-0.5)).unwrap();
        assert_eq!(load.vertex, Vertex { x: 50.0, y: 20.0 });
        assert_eq!(load.fy, None);

        let pin = &nodes[0];
        assert_eq!((pin.ux, pin.uy, pin.fx, pin.fy), (Some(0.0), Some(0.0), None, None));
    }

    #[test]
    fn test_parse_input_file() {
        let input = json::parse(
            r#"{
                "metadata": {
                    "length": 1000, "height": 100, "part_thickness": 50,
                    "elements_x": 20, "elements_y": 4
                },
                "boundary_conditions": {
                    "fixed": {
                        "region": { "x_target_max": 1 },
                        "targets": { "ux": 0, "uy": 0 }
                    }
                }
            }"#,
        )
        .unwrap();

        let geometry = parse_input_metadata(&input).unwrap();
        assert_eq!(geometry.elements_x, 20);
        assert_eq!(geometry.load_displacement, BeamGeometry::default().load_displacement);

        let rules = parse_boundary_conditions(&input).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].region.x_max, 1.0);
        assert_eq!(rules[0].region.x_min, f64::MIN);
    }

    #[test]
    fn test_over_constrained_rule_rejected() {
        let input = json::parse(
            r#"{ "boundary_conditions": {
                    "bad": { "region": {}, "targets": { "ux": 0, "fx": 1, "uy": 0 } }
            } }"#,
        )
        .unwrap();
        let err = parse_boundary_conditions(&input).unwrap_err();
        assert!(err.to_string().contains("over-constrained in x-axis"));
    }

    #[test]
    fn test_load_beam_setup_generates_default_rules() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("beam.json");
        std::fs::write(
            &path,
            r#"{ "metadata": { "length": 1000, "height": 100, "part_thickness": 50,
                               "elements_x": 10, "elements_y": 2, "load_displacement": 2 } }"#,
        )
        .unwrap();

        let setup = load_beam_setup(&path).unwrap();
        assert_eq!(setup.boundary_rules.len(), 3);
        assert_eq!(setup.geometry.load_displacement, 2.0);

        std::fs::write(&path, r#"{ "metadata": { "length": 1000 } }"#).unwrap();
        assert!(load_beam_setup(&path).is_err());
    }
}
