//! Shared helpers for model input preparation

pub mod preprocessing;

pub use preprocessing::{
    ImagePreprocessor, LetterboxTransform, PreprocessingOptions, ResizeTransform,
};
