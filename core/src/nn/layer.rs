use crate::error::Result;
use crate::tensor::{DistMatrix, TensorElem};
use std::fmt::Debug;

/// A layer of a data-parallel network.
///
/// `forward` maps the previous layer's activations to this layer's activations. `backward`
/// receives both activations plus the error signal flowing back from the next layer
/// (`prev_error_signal`), and returns the error signal for the previous layer. Outputs are
/// distributed like the inputs.
///
/// Layers are shared across worker threads, so they must be `Send + Sync`.
pub trait Layer<T: TensorElem>: Debug + Send + Sync {
    fn name(&self) -> &str;

    fn forward(&self, prev_activations: &DistMatrix<T>) -> Result<DistMatrix<T>>;

    fn backward(
        &self,
        prev_activations: &DistMatrix<T>,
        activations: &DistMatrix<T>,
        prev_error_signal: &DistMatrix<T>,
    ) -> Result<DistMatrix<T>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Mat;

    #[derive(Debug)]
    struct Identity;

    impl Layer<f32> for Identity {
        fn name(&self) -> &str {
            "identity"
        }

        fn forward(&self, prev_activations: &DistMatrix<f32>) -> Result<DistMatrix<f32>> {
            Ok(prev_activations.clone())
        }

        fn backward(
            &self,
            _prev_activations: &DistMatrix<f32>,
            _activations: &DistMatrix<f32>,
            prev_error_signal: &DistMatrix<f32>,
        ) -> Result<DistMatrix<f32>> {
            Ok(prev_error_signal.clone())
        }
    }

    #[test]
    fn test_layer_as_trait_object() {
        let layer: Box<dyn Layer<f32>> = Box::new(Identity);
        let x = DistMatrix::single(Mat::from_rows(&[&[1.0, 2.0]]).unwrap());
        let y = layer.forward(&x).unwrap();
        assert_eq!(y.locked_matrix(), x.locked_matrix());
        assert_eq!(layer.name(), "identity");
    }
}
