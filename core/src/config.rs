//! Layer and objective configuration.
//! Deserialized from the JSON the training pipeline hands over.

use crate::error::{Error, Result};
use crate::loss::{CrossEntropy, MeanAbsoluteError, MeanSquaredError, ObjectiveFunction};
use crate::tensor::TensorElem;
use serde::{Deserialize, Serialize};

/// Hyperparameters of a local response normalization layer.
///
/// Fixed once the layer is built.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LrnConfig {
    /// Number of channels in the normalization window.
    pub window_width: usize,
    /// Scale on the windowed sum of squares.
    pub alpha: f64,
    /// Exponent applied to the scale factor.
    pub beta: f64,
    /// Additive constant of the scale factor.
    pub k: f64,
}

impl Default for LrnConfig {
    fn default() -> Self {
        Self {
            window_width: 5,
            alpha: 1e-4,
            beta: 0.75,
            k: 2.0,
        }
    }
}

impl LrnConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the window is non-empty and `alpha`, `beta`, `k` are finite and
    /// non-negative.
    pub fn validate(&self) -> Result<()> {
        if self.window_width == 0 {
            return Err(Error::InvalidConfig(
                "LRN window width must be positive".to_string(),
            ));
        }
        for (name, value) in [("alpha", self.alpha), ("beta", self.beta), ("k", self.k)] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "LRN {} must be finite and non-negative, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// Which loss the objective function evaluates.
///
/// ```json
/// { "type": "cross_entropy", "softmax_shortcut": true }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObjectiveConfig {
    MeanAbsoluteError,
    MeanSquaredError,
    CrossEntropy {
        /// Use `prediction - truth` as the gradient. Requires a preceding softmax layer and
        /// categorical ground truth.
        #[serde(default)]
        softmax_shortcut: bool,
    },
}

impl ObjectiveConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn build<T: TensorElem>(&self) -> Result<ObjectiveFunction<T>> {
        match *self {
            ObjectiveConfig::MeanAbsoluteError => Ok(ObjectiveFunction::new(MeanAbsoluteError)),
            ObjectiveConfig::MeanSquaredError => Ok(ObjectiveFunction::new(MeanSquaredError)),
            ObjectiveConfig::CrossEntropy { softmax_shortcut } => {
                let mut objective = ObjectiveFunction::new(CrossEntropy);
                objective.set_softmax_shortcut(softmax_shortcut)?;
                Ok(objective)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loss::GradientMode;

    #[test]
    fn test_lrn_defaults_fill_missing_fields() {
        let config = LrnConfig::from_json(r#"{ "window_width": 3 }"#).unwrap();
        assert_eq!(config.window_width, 3);
        assert_eq!(config.alpha, 1e-4);
        assert_eq!(config.beta, 0.75);
        assert_eq!(config.k, 2.0);
    }

    #[test]
    fn test_lrn_validation() {
        assert!(LrnConfig::default().validate().is_ok());

        let zero_window = LrnConfig {
            window_width: 0,
            ..LrnConfig::default()
        };
        assert!(matches!(zero_window.validate(), Err(Error::InvalidConfig(_))));

        let negative_beta = LrnConfig {
            beta: -0.5,
            ..LrnConfig::default()
        };
        assert!(matches!(negative_beta.validate(), Err(Error::InvalidConfig(_))));

        let nan_alpha = LrnConfig {
            alpha: f64::NAN,
            ..LrnConfig::default()
        };
        assert!(nan_alpha.validate().is_err());

        assert!(matches!(
            LrnConfig::from_json(r#"{ "alpha": -1.0 }"#),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            LrnConfig::from_json("{ not json"),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn test_objective_config_build() {
        let config =
            ObjectiveConfig::from_json(r#"{ "type": "cross_entropy", "softmax_shortcut": true }"#)
                .unwrap();
        let objective = config.build::<f32>().unwrap();
        assert_eq!(objective.name(), "cross entropy");
        assert_eq!(objective.gradient_mode(), GradientMode::SoftmaxShortcut);

        let config = ObjectiveConfig::from_json(r#"{ "type": "cross_entropy" }"#).unwrap();
        assert_eq!(
            config,
            ObjectiveConfig::CrossEntropy {
                softmax_shortcut: false
            }
        );

        let objective = ObjectiveConfig::MeanAbsoluteError.build::<f64>().unwrap();
        assert_eq!(objective.name(), "mean absolute error");
        assert_eq!(
            ObjectiveConfig::MeanSquaredError.build::<f64>().unwrap().name(),
            "mean squared error"
        );

        assert!(ObjectiveConfig::from_json(r#"{ "type": "hinge" }"#).is_err());
    }
}
