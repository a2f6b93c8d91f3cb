pub mod frame_transformer;
pub mod pipeline;
pub mod sample_accumulator;
