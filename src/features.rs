use serde_json::Value;

use crate::error::{PredictionError, Result};

pub type Number = f64;

pub const FEATURE_COUNT: usize = 7;

/// Column order the classifier was trained on.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] =
    ["N", "P", "K", "temperature", "humidity", "ph", "rainfall"];

/// Inclusive bounds the dashboard's input widgets allowed, in column order.
/// Only callers apply these; the service itself takes any value representable
/// in single precision.
pub const INPUT_BOUNDS: [(Number, Number); FEATURE_COUNT] = [
    (0.0, 140.0),
    (0.0, 145.0),
    (0.0, 205.0),
    (0.0, 50.0),
    (0.0, 100.0),
    (0.0, 14.0),
    (0.0, 300.0),
];

/// Soil and climate readings for one sample, validated on construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector([Number; FEATURE_COUNT]);

impl FeatureVector {
    pub fn new(values: &[Number]) -> Result<Self> {
        if values.len() != FEATURE_COUNT {
            return Err(PredictionError::InvalidFeatureVector(format!(
                "expected {} values, got {}",
                FEATURE_COUNT,
                values.len()
            )));
        }
        let mut out = [0.0; FEATURE_COUNT];
        for (i, &v) in values.iter().enumerate() {
            if !v.is_finite() {
                return Err(PredictionError::InvalidFeatureVector(format!(
                    "{} is not a number: {}",
                    FEATURE_NAMES[i], v
                )));
            }
            // Trees compare in single precision; out-of-range values would become infinite.
            if (v as f32).is_infinite() {
                return Err(PredictionError::InvalidFeatureVector(format!(
                    "{} = {} does not fit in single precision",
                    FEATURE_NAMES[i], v
                )));
            }
            out[i] = v;
        }
        Ok(Self(out))
    }

    /// Like [`FeatureVector::new`], but for callers whose inputs may be missing.
    pub fn from_options(values: &[Option<Number>]) -> Result<Self> {
        let present = values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                v.ok_or_else(|| {
                    PredictionError::InvalidFeatureVector(format!(
                        "{} is missing",
                        name_for(i)
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(&present)
    }

    /// Accepts either an array of seven numbers in column order or an object
    /// keyed by column name (case-insensitive). Extra object keys are ignored.
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Array(items) => {
                let values = items.iter().map(Value::as_f64).collect::<Vec<_>>();
                Self::from_options(&values)
            }
            Value::Object(map) => {
                let values = FEATURE_NAMES
                    .iter()
                    .map(|name| {
                        map.iter()
                            .find(|(k, _)| k.eq_ignore_ascii_case(name))
                            .and_then(|(_, v)| v.as_f64())
                    })
                    .collect::<Vec<_>>();
                Self::from_options(&values)
            }
            other => Err(PredictionError::InvalidFeatureVector(format!(
                "expected an array or object, got {}",
                other
            ))),
        }
    }

    pub fn parse_line(line: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(line)
            .map_err(|e| PredictionError::InvalidFeatureVector(format!("malformed JSON: {}", e)))?;
        Self::from_json(&value)
    }

    pub fn values(&self) -> &[Number; FEATURE_COUNT] {
        &self.0
    }

    pub fn check_bounds(&self) -> Result<()> {
        for (i, (&v, &(lo, hi))) in self.0.iter().zip(INPUT_BOUNDS.iter()).enumerate() {
            if v < lo || v > hi {
                return Err(PredictionError::InvalidFeatureVector(format!(
                    "{} = {} is outside {}..={}",
                    FEATURE_NAMES[i], v, lo, hi
                )));
            }
        }
        Ok(())
    }
}

fn name_for(i: usize) -> String {
    FEATURE_NAMES
        .get(i)
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("value {}", i))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn is_invalid(result: Result<FeatureVector>) -> bool {
        matches!(result, Err(PredictionError::InvalidFeatureVector(_)))
    }

    #[test]
    fn accepts_seven_values() {
        let fv = FeatureVector::new(&[80.0, 40.0, 40.0, 25.0, 80.0, 6.5, 200.0]).unwrap();
        assert_eq!(fv.values()[5], 6.5);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(is_invalid(FeatureVector::new(&[1.0; 6])));
        assert!(is_invalid(FeatureVector::new(&[1.0; 8])));
        assert!(is_invalid(FeatureVector::new(&[])));
    }

    #[test]
    fn rejects_nan_and_infinity() {
        assert!(is_invalid(FeatureVector::new(&[1.0, 2.0, 3.0, Number::NAN, 5.0, 6.0, 7.0])));
        assert!(is_invalid(FeatureVector::new(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, Number::INFINITY])));
    }

    #[test]
    fn rejects_values_beyond_single_precision() {
        let err = FeatureVector::new(&[1e300, 40.0, 40.0, 25.0, 80.0, 6.5, 200.0]).unwrap_err();
        assert!(err.to_string().contains("N = "));
        assert!(is_invalid(FeatureVector::new(&[80.0, 40.0, 40.0, 25.0, 80.0, 6.5, -1e39])));

        let largest = f32::MAX as Number;
        assert!(FeatureVector::new(&[largest, 40.0, 40.0, 25.0, 80.0, 6.5, 200.0]).is_ok());
    }

    #[test]
    fn rejects_missing_value() {
        let values = [Some(1.0), Some(2.0), None, Some(4.0), Some(5.0), Some(6.0), Some(7.0)];
        let err = FeatureVector::from_options(&values).unwrap_err();
        assert!(err.to_string().contains("K is missing"));
    }

    #[test]
    fn parses_json_array() {
        let fv = FeatureVector::parse_line("[90, 42, 43, 20.8, 82.0, 6.5, 202.9]").unwrap();
        assert_eq!(fv.values(), &[90.0, 42.0, 43.0, 20.8, 82.0, 6.5, 202.9]);
    }

    #[test]
    fn json_array_with_null_or_string_is_invalid() {
        assert!(is_invalid(FeatureVector::parse_line("[90, 42, null, 20.8, 82.0, 6.5, 202.9]")));
        assert!(is_invalid(FeatureVector::parse_line(r#"[90, 42, "43", 20.8, 82.0, 6.5, 202.9]"#)));
    }

    #[test]
    fn parses_json_object_by_column_name() {
        let row = json!({
            "N": 90, "P": 42, "K": 43, "temperature": 20.8,
            "humidity": 82.0, "pH": 6.5, "rainfall": 202.9, "label": "rice"
        });
        let fv = FeatureVector::from_json(&row).unwrap();
        assert_eq!(fv.values()[5], 6.5);
    }

    #[test]
    fn json_object_missing_column_is_invalid() {
        let row = json!({ "N": 90, "P": 42, "K": 43 });
        let err = FeatureVector::from_json(&row).unwrap_err();
        assert!(err.to_string().contains("temperature"));
    }

    #[test]
    fn malformed_json_is_invalid() {
        assert!(is_invalid(FeatureVector::parse_line("[1, 2,")));
        assert!(is_invalid(FeatureVector::parse_line("42")));
    }

    #[test]
    fn bounds_follow_dashboard_inputs() {
        let ok = FeatureVector::new(&[140.0, 145.0, 205.0, 50.0, 100.0, 14.0, 300.0]).unwrap();
        assert!(ok.check_bounds().is_ok());

        let high_ph = FeatureVector::new(&[50.0, 50.0, 50.0, 25.0, 60.0, 14.5, 100.0]).unwrap();
        let err = high_ph.check_bounds().unwrap_err();
        assert!(err.to_string().contains("ph"));
    }
}
