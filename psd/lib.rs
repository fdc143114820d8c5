#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod basis;
pub mod bayes;
pub mod config;
pub mod fourier;
pub mod pipeline;
pub mod sampler;
pub mod simulate;
pub mod spline_model;
pub mod summary;
