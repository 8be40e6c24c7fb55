pub mod checkpoints;
pub mod hooks;
pub mod init;
pub mod run_batch;
