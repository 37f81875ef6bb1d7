//! Dimension-checked physical quantities.
//!
//! A [`UnitRegistry`] is built once and handed to whatever needs to attach or
//! verify units. Quantities store their magnitude in SI base units together
//! with a [`Dimension`]; adding quantities of different dimensions is an error,
//! multiplying and dividing them combines the dimensions.

use std::collections::HashMap;
use std::fmt::Display;
use std::ops::{Div, Mul};

use crate::error::{CemflowError, Result};

const BASE_SYMBOLS: [&str; 7] = ["m", "kg", "s", "A", "K", "mol", "cd"];
const BASE_NAMES: [&str; 7] = [
    "length",
    "mass",
    "time",
    "current",
    "temperature",
    "substance",
    "luminosity",
];

/// Exponents of the seven SI base dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Dimension([i8; 7]);

impl Dimension {
    pub const DIMENSIONLESS: Dimension = Dimension([0, 0, 0, 0, 0, 0, 0]);
    pub const LENGTH: Dimension = Dimension([1, 0, 0, 0, 0, 0, 0]);
    pub const MASS: Dimension = Dimension([0, 1, 0, 0, 0, 0, 0]);
    pub const TIME: Dimension = Dimension([0, 0, 1, 0, 0, 0, 0]);
    pub const CURRENT: Dimension = Dimension([0, 0, 0, 1, 0, 0, 0]);
    pub const TEMPERATURE: Dimension = Dimension([0, 0, 0, 0, 1, 0, 0]);
    pub const SUBSTANCE: Dimension = Dimension([0, 0, 0, 0, 0, 1, 0]);
    pub const LUMINOSITY: Dimension = Dimension([0, 0, 0, 0, 0, 0, 1]);

    pub fn is_dimensionless(&self) -> bool {
        *self == Dimension::DIMENSIONLESS
    }

    pub fn powi(self, n: i8) -> Dimension {
        Dimension(self.0.map(|e| e * n))
    }

    /// Exponent-wise sum, `None` when an exponent leaves the `i8` range
    pub fn checked_mul(self, rhs: Dimension) -> Option<Dimension> {
        let mut exponents = self.0;
        for (e, r) in exponents.iter_mut().zip(rhs.0) {
            *e = e.checked_add(r)?;
        }
        Some(Dimension(exponents))
    }

    pub fn checked_div(self, rhs: Dimension) -> Option<Dimension> {
        self.checked_mul(rhs.checked_powi(-1)?)
    }

    pub fn checked_powi(self, n: i8) -> Option<Dimension> {
        let mut exponents = self.0;
        for e in exponents.iter_mut() {
            *e = e.checked_mul(n)?;
        }
        Some(Dimension(exponents))
    }

    /// Formats the dimension with SI base symbols, e.g. `m^2 s^-2 K^-1`
    pub fn si_symbol(&self) -> String {
        let parts: Vec<String> = self
            .0
            .iter()
            .zip(BASE_SYMBOLS)
            .filter(|(e, _)| **e != 0)
            .map(|(e, s)| if *e == 1 { s.to_owned() } else { format!("{s}^{e}") })
            .collect();

        parts.join(" ")
    }
}

impl Mul for Dimension {
    type Output = Dimension;

    fn mul(self, rhs: Dimension) -> Dimension {
        let mut exponents = self.0;
        for (e, r) in exponents.iter_mut().zip(rhs.0) {
            *e += r;
        }
        Dimension(exponents)
    }
}

impl Div for Dimension {
    type Output = Dimension;

    fn div(self, rhs: Dimension) -> Dimension {
        self * rhs.powi(-1)
    }
}

impl Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_dimensionless() {
            return write!(f, "dimensionless");
        }

        let parts: Vec<String> = self
            .0
            .iter()
            .zip(BASE_NAMES)
            .filter(|(e, _)| **e != 0)
            .map(|(e, n)| {
                if *e == 1 {
                    format!("[{n}]")
                } else {
                    format!("[{n}]^{e}")
                }
            })
            .collect();

        write!(f, "{}", parts.join(" * "))
    }
}

/// A parsed unit expression
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    symbol: String,
    scale: f64,
    offset: f64,
    dimension: Dimension,
}

impl Unit {
    pub fn dimensionless() -> Unit {
        Unit {
            symbol: String::new(),
            scale: 1.0,
            offset: 0.0,
            dimension: Dimension::DIMENSIONLESS,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Factor converting a magnitude in this unit to SI base units
    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    fn ensure_plain(&self, other: &Unit) -> Result<()> {
        if self.offset != 0.0 || other.offset != 0.0 {
            return Err(CemflowError::Unit(format!(
                "Offset unit cannot be combined with other units in '{}' and '{}'",
                self.symbol, other.symbol
            )));
        }
        Ok(())
    }

    fn checked_powi(&self, n: i8) -> Result<Unit> {
        if n == 1 {
            return Ok(self.clone());
        }
        if self.offset != 0.0 {
            return Err(CemflowError::Unit(format!(
                "Offset unit '{}' cannot be raised to a power",
                self.symbol
            )));
        }

        let dimension = self
            .dimension
            .checked_powi(n)
            .ok_or_else(|| exponent_overflow(&self.symbol))?;
        Ok(Unit {
            symbol: format!("{}^{}", self.symbol, n),
            scale: self.scale.powi(n as i32),
            offset: 0.0,
            dimension,
        })
    }

    fn checked_mul(&self, rhs: &Unit) -> Result<Unit> {
        self.ensure_plain(rhs)?;
        let symbol = format!("{}*{}", self.symbol, rhs.symbol);
        let dimension = self
            .dimension
            .checked_mul(rhs.dimension)
            .ok_or_else(|| exponent_overflow(&symbol))?;
        Ok(Unit {
            symbol,
            scale: self.scale * rhs.scale,
            offset: 0.0,
            dimension,
        })
    }

    fn checked_div(&self, rhs: &Unit) -> Result<Unit> {
        self.ensure_plain(rhs)?;
        let symbol = format!("{}/{}", self.symbol, rhs.symbol);
        let dimension = self
            .dimension
            .checked_div(rhs.dimension)
            .ok_or_else(|| exponent_overflow(&symbol))?;
        Ok(Unit {
            symbol,
            scale: self.scale / rhs.scale,
            offset: 0.0,
            dimension,
        })
    }
}

fn exponent_overflow(symbol: &str) -> CemflowError {
    CemflowError::Unit(format!("Dimension exponent out of range in '{symbol}'"))
}

/// A magnitude in SI base units tagged with its dimension
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantity {
    value: f64,
    dimension: Dimension,
}

impl Quantity {
    /// Creates a quantity from a magnitude expressed in `unit`
    pub fn new(magnitude: f64, unit: &Unit) -> Quantity {
        Quantity {
            value: magnitude * unit.scale + unit.offset,
            dimension: unit.dimension,
        }
    }

    pub fn dimensionless(value: f64) -> Quantity {
        Quantity {
            value,
            dimension: Dimension::DIMENSIONLESS,
        }
    }

    /// The magnitude in SI base units
    pub fn si_value(&self) -> f64 {
        self.value
    }

    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    pub fn is_dimensionless(&self) -> bool {
        self.dimension.is_dimensionless()
    }

    /// Expresses the quantity as a magnitude in `unit`
    pub fn to(&self, unit: &Unit) -> Result<f64> {
        self.ensure_dimension(unit.dimension)?;
        Ok((self.value - unit.offset) / unit.scale)
    }

    pub fn checked_add(&self, other: &Quantity) -> Result<Quantity> {
        self.ensure_dimension(other.dimension)?;
        Ok(Quantity {
            value: self.value + other.value,
            dimension: self.dimension,
        })
    }

    pub fn checked_sub(&self, other: &Quantity) -> Result<Quantity> {
        self.ensure_dimension(other.dimension)?;
        Ok(Quantity {
            value: self.value - other.value,
            dimension: self.dimension,
        })
    }

    pub fn powi(&self, n: i8) -> Quantity {
        Quantity {
            value: self.value.powi(n as i32),
            dimension: self.dimension.powi(n),
        }
    }

    fn ensure_dimension(&self, expected: Dimension) -> Result<()> {
        if self.dimension != expected {
            return Err(CemflowError::DimensionMismatch {
                expected: expected.to_string(),
                found: self.dimension.to_string(),
            });
        }
        Ok(())
    }
}

impl Mul for Quantity {
    type Output = Quantity;

    fn mul(self, rhs: Quantity) -> Quantity {
        Quantity {
            value: self.value * rhs.value,
            dimension: self.dimension * rhs.dimension,
        }
    }
}

impl Div for Quantity {
    type Output = Quantity;

    fn div(self, rhs: Quantity) -> Quantity {
        Quantity {
            value: self.value / rhs.value,
            dimension: self.dimension / rhs.dimension,
        }
    }
}

impl Mul<f64> for Quantity {
    type Output = Quantity;

    fn mul(self, rhs: f64) -> Quantity {
        Quantity {
            value: self.value * rhs,
            dimension: self.dimension,
        }
    }
}

impl Mul<Quantity> for f64 {
    type Output = Quantity;

    fn mul(self, rhs: Quantity) -> Quantity {
        rhs * self
    }
}

impl Div<f64> for Quantity {
    type Output = Quantity;

    fn div(self, rhs: f64) -> Quantity {
        Quantity {
            value: self.value / rhs,
            dimension: self.dimension,
        }
    }
}

impl Display for Quantity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_dimensionless() {
            write!(f, "{}", self.value)
        } else {
            write!(f, "{} {}", self.value, self.dimension.si_symbol())
        }
    }
}

/// Calculator output: either a bare number or a unit-tagged quantity
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Plain(f64),
    Quantity(Quantity),
}

impl Value {
    /// The numeric value; quantities report their SI magnitude
    pub fn as_f64(&self) -> f64 {
        match self {
            Value::Plain(v) => *v,
            Value::Quantity(q) => q.si_value(),
        }
    }

    pub fn as_quantity(&self) -> Option<&Quantity> {
        match self {
            Value::Plain(_) => None,
            Value::Quantity(q) => Some(q),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Plain(v) => write!(f, "{v}"),
            Value::Quantity(q) => write!(f, "{q}"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct UnitDef {
    scale: f64,
    offset: f64,
    dimension: Dimension,
    prefixable: bool,
}

/// Immutable table of unit symbols and SI prefixes
#[derive(Debug, Clone)]
pub struct UnitRegistry {
    units: HashMap<&'static str, UnitDef>,
    prefixes: Vec<(&'static str, f64)>,
}

impl Default for UnitRegistry {
    fn default() -> Self {
        UnitRegistry::new()
    }
}

impl UnitRegistry {
    pub fn new() -> UnitRegistry {
        let force = Dimension::MASS * Dimension::LENGTH / Dimension::TIME.powi(2);
        let energy = force * Dimension::LENGTH;

        let defs: [(&'static str, f64, f64, Dimension, bool); 20] = [
            ("m", 1.0, 0.0, Dimension::LENGTH, true),
            ("g", 1e-3, 0.0, Dimension::MASS, true),
            ("s", 1.0, 0.0, Dimension::TIME, true),
            ("A", 1.0, 0.0, Dimension::CURRENT, true),
            ("K", 1.0, 0.0, Dimension::TEMPERATURE, true),
            ("mol", 1.0, 0.0, Dimension::SUBSTANCE, true),
            ("cd", 1.0, 0.0, Dimension::LUMINOSITY, true),
            ("N", 1.0, 0.0, force, true),
            ("Pa", 1.0, 0.0, force / Dimension::LENGTH.powi(2), true),
            ("J", 1.0, 0.0, energy, true),
            ("W", 1.0, 0.0, energy / Dimension::TIME, true),
            ("Hz", 1.0, 0.0, Dimension::TIME.powi(-1), true),
            ("L", 1e-3, 0.0, Dimension::LENGTH.powi(3), true),
            ("t", 1e3, 0.0, Dimension::MASS, false),
            ("min", 60.0, 0.0, Dimension::TIME, false),
            ("h", 3600.0, 0.0, Dimension::TIME, false),
            ("day", 86400.0, 0.0, Dimension::TIME, false),
            ("degC", 1.0, 273.15, Dimension::TEMPERATURE, false),
            ("percent", 1e-2, 0.0, Dimension::DIMENSIONLESS, false),
            ("dimensionless", 1.0, 0.0, Dimension::DIMENSIONLESS, false),
        ];

        let units = defs
            .into_iter()
            .map(|(symbol, scale, offset, dimension, prefixable)| {
                (
                    symbol,
                    UnitDef {
                        scale,
                        offset,
                        dimension,
                        prefixable,
                    },
                )
            })
            .collect();

        let prefixes = vec![
            ("G", 1e9),
            ("M", 1e6),
            ("k", 1e3),
            ("h", 1e2),
            ("d", 1e-1),
            ("c", 1e-2),
            ("m", 1e-3),
            ("u", 1e-6),
            ("µ", 1e-6),
            ("n", 1e-9),
        ];

        UnitRegistry { units, prefixes }
    }

    fn lookup(&self, symbol: &str) -> Result<Unit> {
        if let Some(def) = self.units.get(symbol) {
            return Ok(Unit {
                symbol: symbol.to_owned(),
                scale: def.scale,
                offset: def.offset,
                dimension: def.dimension,
            });
        }

        for (prefix, factor) in &self.prefixes {
            let Some(rest) = symbol.strip_prefix(prefix) else {
                continue;
            };
            if let Some(def) = self.units.get(rest).filter(|d| d.prefixable) {
                return Ok(Unit {
                    symbol: symbol.to_owned(),
                    scale: factor * def.scale,
                    offset: 0.0,
                    dimension: def.dimension,
                });
            }
        }

        Err(CemflowError::Unit(format!("Unknown unit symbol '{symbol}'")))
    }

    /// Parses a unit expression such as `N/mm^2`, `J/kg/K` or `1/s`
    ///
    /// # Arguments
    /// * `expr` - The unit expression; empty means dimensionless
    ///
    /// # Returns
    /// The combined unit
    pub fn parse_unit(&self, expr: &str) -> Result<Unit> {
        if expr.trim().is_empty() {
            return Ok(Unit::dimensionless());
        }

        let mut parser = UnitParser {
            registry: self,
            chars: expr.chars().collect(),
            pos: 0,
        };

        let mut unit = parser.parse_expression()?;
        parser.skip_whitespace();
        if parser.pos < parser.chars.len() {
            return Err(CemflowError::Unit(format!(
                "Unexpected '{}' in unit expression '{expr}'",
                parser.chars[parser.pos]
            )));
        }

        unit.symbol = expr.trim().to_owned();
        Ok(unit)
    }

    pub fn quantity(&self, magnitude: f64, expr: &str) -> Result<Quantity> {
        Ok(Quantity::new(magnitude, &self.parse_unit(expr)?))
    }

    /// Parses text of the form `<number> [unit]`, e.g. `2900 kg/m^3`
    pub fn parse_quantity(&self, text: &str) -> Result<Quantity> {
        let text = text.trim();
        let (number, unit) = match text.split_once(char::is_whitespace) {
            Some((number, unit)) => (number, unit),
            None => (text, ""),
        };

        let magnitude: f64 = number
            .parse()
            .map_err(|_| CemflowError::Unit(format!("Invalid magnitude '{number}' in '{text}'")))?;

        self.quantity(magnitude, unit)
    }

    /// Verifies that `quantity` has the dimension of `expr`
    pub fn check(&self, quantity: &Quantity, expr: &str) -> Result<()> {
        quantity.ensure_dimension(self.parse_unit(expr)?.dimension)
    }

    /// The magnitude of `quantity` expressed in `expr`
    pub fn magnitude_in(&self, quantity: &Quantity, expr: &str) -> Result<f64> {
        quantity.to(&self.parse_unit(expr)?)
    }
}

struct UnitParser<'a> {
    registry: &'a UnitRegistry,
    chars: Vec<char>,
    pos: usize,
}

impl UnitParser<'_> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn parse_expression(&mut self) -> Result<Unit> {
        let mut unit = self.parse_factor()?;

        loop {
            self.skip_whitespace();
            match self.peek() {
                None | Some(')') => break,
                Some('*') | Some('·') => {
                    self.pos += 1;
                    unit = unit.checked_mul(&self.parse_factor()?)?;
                }
                Some('/') => {
                    self.pos += 1;
                    unit = unit.checked_div(&self.parse_factor()?)?;
                }
                // juxtaposition, as in `kg m^2`
                Some(_) => unit = unit.checked_mul(&self.parse_factor()?)?,
            }
        }

        Ok(unit)
    }

    fn parse_factor(&mut self) -> Result<Unit> {
        self.skip_whitespace();

        let atom = match self.peek() {
            Some('(') => {
                self.pos += 1;
                let inner = self.parse_expression()?;
                self.skip_whitespace();
                if self.peek() != Some(')') {
                    return Err(CemflowError::Unit("Unbalanced parenthesis".to_owned()));
                }
                self.pos += 1;
                inner
            }
            Some(c) if c.is_ascii_digit() => {
                let literal = self.take_while(|c| c.is_ascii_digit());
                let scale: f64 = literal
                    .parse()
                    .map_err(|_| CemflowError::Unit(format!("Invalid number '{literal}'")))?;
                Unit {
                    symbol: literal,
                    scale,
                    offset: 0.0,
                    dimension: Dimension::DIMENSIONLESS,
                }
            }
            Some(c) if c.is_alphabetic() || c == '_' => {
                let symbol = self.take_while(|c| c.is_alphabetic() || c == '_');
                self.registry.lookup(&symbol)?
            }
            Some(c) => {
                return Err(CemflowError::Unit(format!(
                    "Unexpected '{c}' in unit expression"
                )))
            }
            None => {
                return Err(CemflowError::Unit(
                    "Unit expression ended unexpectedly".to_owned(),
                ))
            }
        };

        self.skip_whitespace();
        let has_exponent = match self.peek() {
            Some('^') => {
                self.pos += 1;
                true
            }
            Some('*') if self.chars.get(self.pos + 1) == Some(&'*') => {
                self.pos += 2;
                true
            }
            _ => false,
        };

        if !has_exponent {
            return Ok(atom);
        }

        self.skip_whitespace();
        let negative = self.peek() == Some('-');
        if negative {
            self.pos += 1;
        }
        let digits = self.take_while(|c| c.is_ascii_digit());
        let exponent: i8 = digits
            .parse()
            .map_err(|_| CemflowError::Unit(format!("Invalid exponent '{digits}'")))?;

        atom.checked_powi(if negative { -exponent } else { exponent })
    }

    fn take_while(&mut self, predicate: impl Fn(char) -> bool) -> String {
        let start = self.pos;
        while self.peek().is_some_and(&predicate) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }
}
