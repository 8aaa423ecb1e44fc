pub mod aggregate;
pub mod biogenic;
pub mod config;
pub mod domain;
pub mod error;
pub mod exiobase;
pub mod geo;
pub mod harmonize;
pub mod linker;
pub mod model;
pub mod normalize;
pub mod output;
pub mod pipeline;
pub mod resolver;
pub mod rules;
pub mod source;
pub mod store;
