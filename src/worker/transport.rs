//! What a protocol adapter has to provide to the worker shell.

use thiserror::Error;

use crate::catalog::JobDef;
use crate::exit;

#[derive(Debug, Error)]
#[error("{msg} ({})", exit::describe(*.code))]
pub struct TransferError {
    /// Exit code of the worker process.
    pub code: i32,
    pub msg: String,
}

impl TransferError {
    pub fn new(code: i32, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
        }
    }

    pub fn io(code: i32, what: &str, e: std::io::Error) -> Self {
        Self::new(code, format!("{}: {}", what, e))
    }
}

pub type TResult<T> = std::result::Result<T, TransferError>;

/// One connection to one recipient; files are streamed block by block so
/// the shell can account progress and enforce rate and timeout limits.
pub trait Transport {
    fn connect(&mut self, job: &JobDef, hostname: &str) -> TResult<()>;
    fn open_file(&mut self, name: &str, size: u64) -> TResult<()>;
    fn write_block(&mut self, data: &[u8]) -> TResult<()>;
    fn close_file(&mut self) -> TResult<()>;
    fn disconnect(&mut self);
}
