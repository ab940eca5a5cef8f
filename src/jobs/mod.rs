pub mod cleanup;
pub mod rollup;
