//! Process exit codes surfaced to the parent for error-history attribution.

pub const SUCCESS: i32 = 0;
pub const INCORRECT: i32 = 1;

pub const TRANSFER_SUCCESS: i32 = 0;
pub const CONNECT_ERROR: i32 = 2;
pub const USER_ERROR: i32 = 3;
pub const PASSWORD_ERROR: i32 = 4;
pub const TYPE_ERROR: i32 = 5;
pub const OPEN_REMOTE_ERROR: i32 = 10;
pub const WRITE_REMOTE_ERROR: i32 = 11;
pub const CLOSE_REMOTE_ERROR: i32 = 12;
pub const MOVE_REMOTE_ERROR: i32 = 13;
pub const CHDIR_ERROR: i32 = 14;
pub const TIMEOUT_ERROR: i32 = 20;
pub const READ_REMOTE_ERROR: i32 = 22;
pub const OPEN_LOCAL_ERROR: i32 = 30;
pub const READ_LOCAL_ERROR: i32 = 31;
pub const STAT_LOCAL_ERROR: i32 = 32;
pub const WRITE_LOCAL_ERROR: i32 = 34;
pub const ALLOC_ERROR: i32 = 35;
pub const MOVE_ERROR: i32 = 36;
pub const NO_FILES_TO_SEND: i32 = 40;
pub const STILL_FILES_TO_SEND: i32 = 41;
pub const SYNTAX_ERROR: i32 = 60;
pub const JID_NUMBER_ERROR: i32 = 61;
pub const GOT_KILLED: i32 = 70;

/// Exit codes that do not count as a host error.
pub fn is_success(code: i32) -> bool {
    code == TRANSFER_SUCCESS || code == NO_FILES_TO_SEND
}

/// Errors the host cannot be blamed for; they are not fed into `error_counter`.
pub fn is_local_error(code: i32) -> bool {
    matches!(
        code,
        OPEN_LOCAL_ERROR | READ_LOCAL_ERROR | STAT_LOCAL_ERROR | ALLOC_ERROR | SYNTAX_ERROR | JID_NUMBER_ERROR
    )
}

pub fn describe(code: i32) -> &'static str {
    match code {
        TRANSFER_SUCCESS => "transfer success",
        CONNECT_ERROR => "connect error",
        USER_ERROR => "user error",
        PASSWORD_ERROR => "password error",
        TYPE_ERROR => "type error",
        OPEN_REMOTE_ERROR => "open remote error",
        WRITE_REMOTE_ERROR => "write remote error",
        CLOSE_REMOTE_ERROR => "close remote error",
        MOVE_REMOTE_ERROR => "move remote error",
        CHDIR_ERROR => "chdir error",
        TIMEOUT_ERROR => "timeout",
        READ_REMOTE_ERROR => "read remote error",
        OPEN_LOCAL_ERROR => "open local error",
        READ_LOCAL_ERROR => "read local error",
        STAT_LOCAL_ERROR => "stat local error",
        WRITE_LOCAL_ERROR => "write local error",
        ALLOC_ERROR => "alloc error",
        MOVE_ERROR => "move error",
        NO_FILES_TO_SEND => "no files to send",
        STILL_FILES_TO_SEND => "still files to send",
        SYNTAX_ERROR => "syntax error",
        JID_NUMBER_ERROR => "job id not in database",
        GOT_KILLED => "got killed",
        _ => "unknown error",
    }
}
