pub mod worker;

pub use worker::{StopToken, Worker, WorkerError, WorkerHandle, WorkerLoop};
