use tracing::{debug, warn};

use crate::{
    calculators::Phases,
    error::Result,
    units::{Quantity, UnitRegistry},
};

const FRACTION_SUM_TOLERANCE: f64 = 1e-6;

/// Computes the specific heat capacity of a cement paste as the
/// volume-fraction weighted sum of its phases
///
/// # Arguments
/// * `registry` - The unit registry used for dimension checks
/// * `volume_fractions` - Dimensionless volume fractions of each phase
/// * `heat_capacities` - Specific heat capacity of each phase
///
/// # Returns
/// The paste's specific heat capacity
pub fn paste_specific_heat_capacity(
    registry: &UnitRegistry,
    volume_fractions: &Phases<Quantity>,
    heat_capacities: &Phases<Quantity>,
) -> Result<Quantity> {
    let mut fraction_sum = 0.0;
    for (_, fraction) in volume_fractions.iter() {
        registry.check(fraction, "")?;
        fraction_sum += fraction.si_value();
    }
    for (_, capacity) in heat_capacities.iter() {
        registry.check(capacity, "J/kg/K")?;
    }

    if (fraction_sum - 1.0).abs() > FRACTION_SUM_TOLERANCE {
        warn!("paste volume fractions sum to {fraction_sum}, not 1");
    }

    let mut total = registry.quantity(0.0, "J/kg/K")?;
    for ((phase, fraction), (_, capacity)) in volume_fractions.iter().zip(heat_capacities.iter()) {
        let contribution = *fraction * *capacity;
        debug!("{phase} contributes {contribution}");
        total = total.checked_add(&contribution)?;
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CemflowError;

    #[test]
    fn test_weighted_sum() {
        let ureg = UnitRegistry::new();
        let fractions = Phases::new(
            ureg.quantity(0.3, "").unwrap(),
            ureg.quantity(0.2, "").unwrap(),
            ureg.quantity(0.5, "").unwrap(),
        );
        let capacities = Phases::new(
            ureg.quantity(1.0, "J/kg/K").unwrap(),
            ureg.quantity(2.0, "J/kg/K").unwrap(),
            ureg.quantity(3.0, "J/kg/K").unwrap(),
        );

        let shc = paste_specific_heat_capacity(&ureg, &fractions, &capacities).unwrap();
        assert!((ureg.magnitude_in(&shc, "J/kg/K").unwrap() - 2.2).abs() < 2.2e-3);
        ureg.check(&shc, "J/kg/K").unwrap();
    }

    #[test]
    fn test_mixed_capacity_units() {
        let ureg = UnitRegistry::new();
        let fractions = Phases::new(
            ureg.quantity(0.5, "").unwrap(),
            ureg.quantity(0.0, "").unwrap(),
            ureg.quantity(0.5, "").unwrap(),
        );
        let capacities = Phases::new(
            ureg.quantity(0.75, "kJ/kg/K").unwrap(),
            ureg.quantity(0.8, "kJ/kg/K").unwrap(),
            ureg.quantity(4180.0, "J/kg/K").unwrap(),
        );

        let shc = paste_specific_heat_capacity(&ureg, &fractions, &capacities).unwrap();
        assert!((shc.si_value() - 2465.0).abs() < 1e-9);
    }

    #[test]
    fn test_wrong_capacity_dimension_fails() {
        let ureg = UnitRegistry::new();
        let fractions = Phases::new(
            ureg.quantity(0.3, "").unwrap(),
            ureg.quantity(0.2, "").unwrap(),
            ureg.quantity(0.5, "").unwrap(),
        );
        let capacities = Phases::new(
            ureg.quantity(1.0, "J/kg").unwrap(),
            ureg.quantity(2.0, "J/kg/K").unwrap(),
            ureg.quantity(3.0, "J/kg/K").unwrap(),
        );

        assert!(matches!(
            paste_specific_heat_capacity(&ureg, &fractions, &capacities),
            Err(CemflowError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_fraction_with_units_fails() {
        let ureg = UnitRegistry::new();
        let fractions = Phases::new(
            ureg.quantity(0.3, "m").unwrap(),
            ureg.quantity(0.2, "").unwrap(),
            ureg.quantity(0.5, "").unwrap(),
        );
        let capacities = Phases::new(
            ureg.quantity(1.0, "J/kg/K").unwrap(),
            ureg.quantity(2.0, "J/kg/K").unwrap(),
            ureg.quantity(3.0, "J/kg/K").unwrap(),
        );

        assert!(paste_specific_heat_capacity(&ureg, &fractions, &capacities).is_err());
    }
}
