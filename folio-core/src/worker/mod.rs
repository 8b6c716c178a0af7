pub mod client;

pub use client::{
    OutputImage, WaitOutcome, WorkerClient, is_transient_model_error,
};
