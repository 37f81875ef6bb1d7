use tracing::debug;

use crate::{
    error::{CemflowError, Result},
    units::{Quantity, UnitRegistry},
};

const GAS_CONSTANT: f64 = 8.3145; // J/(mol K)

const POTENTIAL_HEAT_MAX: f64 = 300_000.0; // J/kg, pure cement
const POTENTIAL_HEAT_MIN: f64 = 100_000.0; // J/kg, pure slag

/// Parameters of the affinity-based cement hydration model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HydrationParameters {
    /// Rate scaling, 1/s
    pub b1: Quantity,
    /// Dimensionless offset of the affinity at low degree of hydration
    pub b2: Quantity,
    /// Dimensionless microdiffusion parameter
    pub eta: Quantity,
    /// Activation energy, J/mol
    pub e_act: Quantity,
    /// Potential heat release per kg binder, J/kg
    pub q_pot: Quantity,
    /// Reference temperature of `b1`
    pub t_ref: Quantity,
}

/// Hydration parameters as a function of slag content.
///
/// Only the potential heat depends on the slag ratio; it interpolates
/// linearly between the pure cement and the pure slag value. The kinetic
/// constants are those calibrated for the reference CEM I paste.
///
/// # Arguments
/// * `registry` - The unit registry
/// * `slag_ratio` - Dimensionless share of slag in the binder, in [0, 1]
pub fn hydration_parameters(
    registry: &UnitRegistry,
    slag_ratio: &Quantity,
) -> Result<HydrationParameters> {
    registry.check(slag_ratio, "")?;
    let ratio = slag_ratio.si_value();
    if !(0.0..=1.0).contains(&ratio) {
        return Err(CemflowError::Input(format!(
            "Slag ratio must be within [0, 1], got {ratio}"
        )));
    }

    let q_pot_max = registry.quantity(POTENTIAL_HEAT_MAX, "J/kg")?;
    let q_pot_min = registry.quantity(POTENTIAL_HEAT_MIN, "J/kg")?;
    let q_pot = q_pot_max.checked_sub(&(q_pot_max.checked_sub(&q_pot_min)? * ratio))?;

    Ok(HydrationParameters {
        b1: registry.quantity(2.916e-4, "1/s")?,
        b2: registry.quantity(0.0024229, "")?,
        eta: registry.quantity(5.554, "")?,
        e_act: registry.quantity(5653.0 * GAS_CONSTANT, "J/mol")?,
        q_pot,
        t_ref: registry.quantity(25.0, "degC")?,
    })
}

impl HydrationParameters {
    /// Heat release rate at a given degree of hydration and temperature
    ///
    /// # Arguments
    /// * `registry` - The unit registry
    /// * `alpha` - Current degree of hydration, in [0, `alpha_max`]
    /// * `alpha_max` - Maximum reachable degree of hydration, in (0, 1]
    /// * `temperature` - Current temperature
    ///
    /// # Returns
    /// The heat release rate per kg binder, in W/kg
    pub fn heat_release_rate(
        &self,
        registry: &UnitRegistry,
        alpha: f64,
        alpha_max: f64,
        temperature: &Quantity,
    ) -> Result<Quantity> {
        registry.check(temperature, "K")?;
        if !(alpha_max > 0.0 && alpha_max <= 1.0) {
            return Err(CemflowError::Input(format!(
                "Maximum degree of hydration must be within (0, 1], got {alpha_max}"
            )));
        }
        if !(0.0..=alpha_max).contains(&alpha) {
            return Err(CemflowError::Input(format!(
                "Degree of hydration must be within [0, {alpha_max}], got {alpha}"
            )));
        }

        let b2 = self.b2.si_value();
        let eta = self.eta.si_value();
        let affinity = (b2 / alpha_max + alpha) * (alpha_max - alpha) * (-eta * alpha / alpha_max).exp();

        let activation_temperature = self.e_act.si_value() / GAS_CONSTANT;
        let arrhenius = (-activation_temperature
            * (1.0 / temperature.si_value() - 1.0 / self.t_ref.si_value()))
        .exp();
        debug!("affinity = {affinity}, temperature factor = {arrhenius}");

        let alpha_rate = self.b1 * (affinity * arrhenius);
        let rate = self.q_pot * alpha_rate;
        registry.check(&rate, "W/kg")?;

        Ok(rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_parameters() {
        let ureg = UnitRegistry::new();
        let params = hydration_parameters(&ureg, &ureg.quantity(0.0, "").unwrap()).unwrap();

        assert!((ureg.magnitude_in(&params.b1, "1/s").unwrap() - 2.916e-4).abs() < 1e-15);
        assert!((params.e_act.si_value() - 47001.8685).abs() < 1e-6);
        assert!((ureg.magnitude_in(&params.t_ref, "degC").unwrap() - 25.0).abs() < 1e-9);
        assert!((ureg.magnitude_in(&params.q_pot, "J/kg").unwrap() - 300_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_potential_heat_drops_with_slag() {
        let ureg = UnitRegistry::new();
        let half = hydration_parameters(&ureg, &ureg.quantity(0.5, "").unwrap()).unwrap();
        let full = hydration_parameters(&ureg, &ureg.quantity(1.0, "").unwrap()).unwrap();

        assert!((half.q_pot.si_value() - 200_000.0).abs() < 1e-6);
        assert!((full.q_pot.si_value() - 100_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_dimensioned_slag_ratio() {
        let ureg = UnitRegistry::new();
        assert!(hydration_parameters(&ureg, &ureg.quantity(0.5, "kg").unwrap()).is_err());
        assert!(hydration_parameters(&ureg, &ureg.quantity(1.2, "").unwrap()).is_err());
    }

    #[test]
    fn test_heat_release_rate_at_reference_temperature() {
        let ureg = UnitRegistry::new();
        let params = hydration_parameters(&ureg, &ureg.quantity(0.0, "").unwrap()).unwrap();
        let t_ref = ureg.quantity(25.0, "degC").unwrap();

        let rate = params.heat_release_rate(&ureg, 0.2, 0.8, &t_ref).unwrap();
        let affinity = (0.0024229 / 0.8 + 0.2) * 0.6 * (-5.554_f64 * 0.25).exp();
        let expected = 300_000.0 * 2.916e-4 * affinity;
        assert!((rate.si_value() - expected).abs() < 1e-9 * expected);

        let at_max = params.heat_release_rate(&ureg, 0.8, 0.8, &t_ref).unwrap();
        assert!(at_max.si_value().abs() < 1e-12);
    }

    #[test]
    fn test_heat_release_rate_increases_with_temperature() {
        let ureg = UnitRegistry::new();
        let params = hydration_parameters(&ureg, &ureg.quantity(0.3, "").unwrap()).unwrap();
        let cold = ureg.quantity(10.0, "degC").unwrap();
        let warm = ureg.quantity(40.0, "degC").unwrap();

        let slow = params.heat_release_rate(&ureg, 0.1, 0.85, &cold).unwrap();
        let fast = params.heat_release_rate(&ureg, 0.1, 0.85, &warm).unwrap();
        assert!(fast.si_value() > slow.si_value());

        assert!(params.heat_release_rate(&ureg, 0.9, 0.85, &warm).is_err());
        assert!(params
            .heat_release_rate(&ureg, 0.1, 0.85, &ureg.quantity(1.0, "s").unwrap())
            .is_err());
    }
}
