mod receive_adapter;

pub use receive_adapter::*;
