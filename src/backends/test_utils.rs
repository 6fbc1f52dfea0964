//! Mock backends for testing model adapters without model files

use crate::{
    error::{Result, StickerError},
    inference::{BackendOptions, InferenceBackend},
    models::ModelSpec,
};
use instant::Duration;
use ndarray::ArrayD;
use std::sync::{Arc, Mutex};

type Responder = dyn Fn(&[ArrayD<f32>]) -> Vec<ArrayD<f32>> + Send;

/// Backend that answers every call with the output of a closure
pub struct MockBackend {
    initialized: bool,
    responder: Box<Responder>,
    /// Input shapes of each `infer` call, for verification in tests
    call_history: Arc<Mutex<Vec<Vec<Vec<usize>>>>>,
    should_fail_inference: bool,
}

impl MockBackend {
    /// Mock that is already initialized and replies via `responder`
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&[ArrayD<f32>]) -> Vec<ArrayD<f32>> + Send + 'static,
    {
        Self {
            initialized: true,
            responder: Box::new(responder),
            call_history: Arc::new(Mutex::new(Vec::new())),
            should_fail_inference: false,
        }
    }

    /// Mock whose every inference fails
    #[must_use]
    pub fn new_failing_inference() -> Self {
        let mut backend = Self::new(|_| Vec::new());
        backend.should_fail_inference = true;
        backend
    }

    /// Shared handle to the recorded input shapes
    #[must_use]
    pub fn call_history(&self) -> Arc<Mutex<Vec<Vec<Vec<usize>>>>> {
        Arc::clone(&self.call_history)
    }
}

impl InferenceBackend for MockBackend {
    fn initialize(&mut self, _spec: &ModelSpec, _options: &BackendOptions) -> Result<Option<Duration>> {
        if self.initialized {
            return Ok(None);
        }
        self.initialized = true;
        Ok(Some(Duration::from_millis(1)))
    }

    fn infer(&mut self, inputs: &[ArrayD<f32>]) -> Result<Vec<ArrayD<f32>>> {
        self.call_history
            .lock()
            .unwrap()
            .push(inputs.iter().map(|i| i.shape().to_vec()).collect());

        if self.should_fail_inference {
            return Err(StickerError::inference("Mock inference failure"));
        }
        Ok((self.responder)(inputs))
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    #[test]
    fn test_mock_records_calls() {
        let mut backend = MockBackend::new(|inputs| vec![inputs[0].clone()]);
        let history = backend.call_history();
        let input = ArrayD::<f32>::ones(IxDyn(&[1, 2]));
        let out = backend.infer(&[input.clone()]).unwrap();
        assert_eq!(out, vec![input]);
        assert_eq!(history.lock().unwrap().as_slice(), &[vec![vec![1, 2]]]);
    }

    #[test]
    fn test_mock_failure() {
        let mut backend = MockBackend::new_failing_inference();
        assert!(backend.infer(&[]).is_err());
    }
}
