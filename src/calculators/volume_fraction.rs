use tracing::debug;

use crate::{
    error::{CemflowError, Result},
    units::{Quantity, UnitRegistry, Value},
};

/// Computes the volume fraction of a cement substitute (slag, fly ash, ...)
/// in the binder from its mass fraction and the two densities.
///
/// The calculation uses a 1 kg binder reference: the substitute and cement
/// masses are converted to volumes with their densities and the substitute's
/// share of the total volume is returned.
///
/// # Arguments
/// * `registry` - The unit registry used for dimension checks
/// * `mass_fraction` - Mass fraction of the substitute in the binder, in [0, 1]
/// * `density_sub` - Density of the substitute
/// * `density_cem` - Density of the cement
///
/// # Returns
/// `Value::Plain(0.0)` when the substitute is absent, otherwise the
/// dimensionless volume fraction as a quantity
pub fn substitute_volume_fraction(
    registry: &UnitRegistry,
    mass_fraction: f64,
    density_sub: &Quantity,
    density_cem: &Quantity,
) -> Result<Value> {
    if !(0.0..=1.0).contains(&mass_fraction) {
        return Err(CemflowError::Input(format!(
            "Substitute mass fraction must be within [0, 1], got {mass_fraction}"
        )));
    }
    registry.check(density_sub, "kg/m^3")?;
    registry.check(density_cem, "kg/m^3")?;

    // consumers rely on a bare zero when there is no substitute
    if mass_fraction == 0.0 {
        return Ok(Value::Plain(0.0));
    }

    let binder = registry.quantity(1.0, "kg")?;
    let mass_sub = binder / (1.0 + (1.0 - mass_fraction) / mass_fraction);
    let mass_cem = binder.checked_sub(&mass_sub)?;
    debug!("mass_sub = {mass_sub}, mass_cem = {mass_cem}");

    let vol_sub = mass_sub / *density_sub;
    let vol_cem = mass_cem / *density_cem;
    let volume_fraction = vol_sub / vol_sub.checked_add(&vol_cem)?;

    registry.check(&volume_fraction, "")?;
    Ok(Value::Quantity(volume_fraction))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn densities(registry: &UnitRegistry) -> (Quantity, Quantity) {
        (
            registry.quantity(2900.0, "kg/m^3").unwrap(),
            registry.quantity(3150.0, "kg/m^3").unwrap(),
        )
    }

    #[test]
    fn test_zero_mass_fraction_is_plain_zero() {
        let ureg = UnitRegistry::new();
        let (sub, cem) = densities(&ureg);
        let result = substitute_volume_fraction(&ureg, 0.0, &sub, &cem).unwrap();
        assert_eq!(result, Value::Plain(0.0));
        assert!(result.as_quantity().is_none());
    }

    #[test]
    fn test_full_substitution_only_depends_on_substitute() {
        let ureg = UnitRegistry::new();
        let (sub, cem) = densities(&ureg);
        let result = substitute_volume_fraction(&ureg, 1.0, &sub, &cem).unwrap();
        let q = result.as_quantity().unwrap();
        assert!(q.is_dimensionless());
        assert!((q.si_value() - 1.0).abs() < 1e-12);

        let other_cem = ureg.quantity(1.0, "g/cm^3").unwrap();
        let again = substitute_volume_fraction(&ureg, 1.0, &sub, &other_cem).unwrap();
        assert!((again.as_f64() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_mass_balance() {
        let ureg = UnitRegistry::new();
        let (sub, cem) = densities(&ureg);
        let result = substitute_volume_fraction(&ureg, 0.3, &sub, &cem).unwrap();

        let v_sub = 0.3 / 2900.0;
        let v_cem = 0.7 / 3150.0;
        let expected = v_sub / (v_sub + v_cem);
        assert!((result.as_f64() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_equal_densities_keep_mass_fraction() {
        let ureg = UnitRegistry::new();
        let rho = ureg.quantity(3.0, "g/cm^3").unwrap();
        let result = substitute_volume_fraction(&ureg, 0.45, &rho, &rho).unwrap();
        assert!((result.as_f64() - 0.45).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_invalid_inputs() {
        let ureg = UnitRegistry::new();
        let (sub, cem) = densities(&ureg);
        assert!(matches!(
            substitute_volume_fraction(&ureg, 1.5, &sub, &cem),
            Err(CemflowError::Input(_))
        ));

        let not_a_density = ureg.quantity(2900.0, "kg").unwrap();
        assert!(matches!(
            substitute_volume_fraction(&ureg, 0.3, &not_a_density, &cem),
            Err(CemflowError::DimensionMismatch { .. })
        ));
    }
}
