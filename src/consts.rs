//! Shared constants: file names, lengths, flag bits, FIFO command bytes.
//!
//! Every value here is part of the on-disk / on-pipe contract between the
//! cooperating processes. Changing a length changes a record layout and is
//! caught by the typesize sidecar (see `typesize`).

// -------- Header prefix (AFD_WORD_OFFSET) --------
// [no_of_entries i32][feature_flag u8][reserved u8][ignore_first_errors u8][struct_version u8]
// [pagesize i32][reserved 4]
pub const AFD_WORD_OFFSET: usize = 16;
pub const HDR_OFF_ENTRIES: usize = 0;
pub const HDR_OFF_FEATURE_FLAG: usize = 4;
pub const HDR_OFF_IGNORE_FIRST_ERRORS: usize = 6;
pub const HDR_OFF_VERSION: usize = 7;
pub const HDR_OFF_PAGESIZE: usize = 8;

/// `no_of_entries == STALE` means: unmap and re-attach.
pub const STALE: i32 = -1;

// -------- Struct versions --------
pub const CURRENT_FSA_VERSION: u8 = 3;
pub const CURRENT_FRA_VERSION: u8 = 4;
pub const CURRENT_JID_VERSION: u8 = 2;
pub const CURRENT_DNB_VERSION: u8 = 1;
pub const CURRENT_FMD_VERSION: u8 = 1;
pub const CURRENT_PWB_VERSION: u8 = 1;
pub const CURRENT_STATUS_VERSION: u8 = 1;
pub const CURRENT_QUEUE_VERSION: u8 = 1;
pub const CURRENT_RL_VERSION: u8 = 1;

// -------- Lengths --------
pub const MAX_HOSTNAME_LENGTH: usize = 8;
pub const MAX_REAL_HOSTNAME_LENGTH: usize = 70;
pub const MAX_PROXY_NAME_LENGTH: usize = 80;
pub const MAX_TOGGLE_STR_LENGTH: usize = 5;
pub const MAX_DIR_ALIAS_LENGTH: usize = 10;
pub const MAX_RECIPIENT_LENGTH: usize = 256;
pub const MAX_FILENAME_LENGTH: usize = 256;
pub const MAX_MSG_NAME_LENGTH: usize = 30;
pub const MAX_PARALLEL_JOBS: usize = 5;
pub const ERROR_HISTORY_LENGTH: usize = 5;
pub const MAX_TIME_ENTRIES: usize = 12;
pub const MAX_USER_NAME_LENGTH: usize = 80;
pub const MAX_PATH_LENGTH: usize = 1024;
pub const MAX_OPTION_LENGTH: usize = 256;
pub const MAX_WAIT_FOR_LENGTH: usize = 64;
pub const MAX_TIMEZONE_LENGTH: usize = 32;

/// First byte of `real_hostname[0]` on a group header record.
pub const GROUP_IDENTIFIER: u8 = 1;

// -------- Work tree --------
pub const FIFO_DIR: &str = "fifodir";
pub const ETC_DIR: &str = "etc";
pub const LOG_DIR: &str = "log";
pub const FILES_DIR: &str = "files";
pub const OUTGOING_DIR: &str = "outgoing";
pub const STORE_DIR: &str = "store";
pub const LS_DATA_DIR: &str = "ls_data";

pub const FSA_ID_FILE: &str = "fsa.id";
pub const FSA_STAT_FILE: &str = "fsa";
pub const FRA_ID_FILE: &str = "fra.id";
pub const FRA_STAT_FILE: &str = "fra";
pub const JID_FILE: &str = "jid_data";
pub const DNB_FILE: &str = "dnb_data";
pub const FMD_FILE: &str = "fmd_data";
pub const PWB_FILE: &str = "pwb_data";
pub const MSG_QUEUE_FILE: &str = "msg_queue_data";
pub const CURRENT_MSG_LIST_FILE: &str = "current_msg_list_file";
pub const TYPESIZE_FILE: &str = "typesize_data";
pub const STATUS_FILE: &str = "afd.status";
pub const ERROR_QUEUE_FILE: &str = "error_queue";
pub const IP_HIST_FILE: &str = "ip_hist_data";
pub const EVENT_LOG_FILE: &str = "event.log";

pub const AFD_CONFIG_FILE: &str = "afdconfig";
pub const DIR_CONFIG_FILE: &str = "dir_config";
pub const HOST_CONFIG_FILE: &str = "host_config";
pub const BUL_CONFIG_FILE: &str = "bul_config";
pub const REP_CONFIG_FILE: &str = "rep_config";
pub const REQUEST_FILE: &str = "request";
pub const ACTION_DIR: &str = "action";

// -------- FIFOs --------
pub const SYS_LOG_FIFO: &str = "sys_log.fifo";
pub const SYSTEM_LOG_FIFO: &str = "system_log.fifo";
pub const TRANSFER_LOG_FIFO: &str = "transfer_log.fifo";
pub const TRANS_DB_LOG_FIFO: &str = "trans_db_log.fifo";
pub const RECEIVE_LOG_FIFO: &str = "receive_log.fifo";
pub const REQUEST_FIFO: &str = "request.fifo";
pub const AFD_CMD_FIFO: &str = "afd_cmd.fifo";
pub const AFD_WORKER_CMD_FIFO: &str = "afd_worker.cmd";
pub const AFD_WORKER_RESP_FIFO: &str = "afd_worker.resp";
pub const AMG_CMD_FIFO: &str = "amg_cmd.fifo";
pub const FD_CMD_FIFO: &str = "fd_cmd.fifo";
pub const FD_WAKE_UP_FIFO: &str = "fd_wake_up.fifo";
pub const MSG_FIFO: &str = "msg.fifo";
pub const QUEUE_LIST_READY_FIFO: &str = "queue_list_ready.fifo";
pub const QUEUE_LIST_DONE_FIFO: &str = "queue_list_done.fifo";

// -------- FIFO command bytes --------
pub const ACKN: u8 = 1;
pub const SHUTDOWN: u8 = 2;
pub const FLUSH_MSG_FIFO_DUMP_QUEUE: u8 = 3;
pub const QUEUE_LIST_READY: u8 = 4;
pub const QUEUE_LIST_EMPTY: u8 = 5;
pub const QUEUE_LIST_DONE: u8 = 6;
pub const CHECK_FSA_ENTRIES: u8 = 7;
pub const BUSY_WORKING: u8 = 8;
pub const WAKE_UP: u8 = 9;
pub const REREAD_CONFIG: u8 = 10;

// -------- Timing --------
pub const AFD_WORKER_TICK: i64 = 5;
pub const COUNT_FILES_INTERVAL: i64 = 300;
pub const COUNT_FILES_MAX_TIME: i64 = 30;
pub const ACTION_CHECK_INTERVAL: i64 = 60;
pub const IP_HIST_INTERVAL: i64 = 6 * 3600;
pub const SPOOL_CHECK_INTERVAL: i64 = 3600;
pub const QUEUE_LIST_READY_TIMEOUT: u64 = 10;
pub const ATPD_CMD_TIMEOUT: u64 = 900;
pub const DEFAULT_ATP_PORT_NO: u16 = 4446;
pub const DEFAULT_WMO_PORT_NO: u16 = 4449;
pub const MAX_FILE_DIR_CHECK_TIME: i64 = 60;
pub const MAX_CHECK_FILE_DIRS: u64 = 2000;
pub const DEFAULT_RESCAN_TIME: i64 = 5;
pub const DEFAULT_MAX_COPIED_FILES: i32 = 100;
pub const DEFAULT_MAX_COPIED_FILE_SIZE: i64 = 100 * 1024 * 1024;
pub const DEFAULT_TRANSFER_TIMEOUT: i32 = 120;
pub const DEFAULT_RETRY_INTERVAL: i32 = 120;
pub const DEFAULT_MAX_ERRORS: i32 = 10;
pub const DEFAULT_ALLOWED_TRANSFERS: i32 = 2;
pub const DEFAULT_BLOCK_SIZE: i32 = 4096;
pub const DEFAULT_SUCCESSFUL_RETRIES: i32 = 10;
pub const DEFAULT_PRIORITY: u8 = b'9';
pub const RESTART_WINDOW: i64 = 60;
pub const MAX_RESTARTS_IN_WINDOW: usize = 5;

/// Externally scheduled directory.
pub const EXTERNAL_SCHEDULE: i64 = i64::MAX;

// -------- Protocol bits --------
pub const FTP: u32 = 0x0001;
pub const LOC: u32 = 0x0002;
pub const SMTP: u32 = 0x0004;
pub const SFTP: u32 = 0x0008;
pub const HTTP: u32 = 0x0010;
pub const WMO: u32 = 0x0020;
pub const SEND_FLAG: u32 = 0x4000_0000;
pub const RETRIEVE_FLAG: u32 = 0x8000_0000;

// -------- host_status bits --------
pub const STOP_TRANSFER: u32 = 0x0000_0001;
pub const PAUSE_QUEUE: u32 = 0x0000_0002;
pub const AUTO_PAUSE_QUEUE: u32 = 0x0000_0004;
pub const DANGER_PAUSE_QUEUE: u32 = 0x0000_0008;
pub const HOST_ERROR_ACKNOWLEDGED: u32 = 0x0000_0010;
pub const HOST_ERROR_OFFLINE: u32 = 0x0000_0020;
pub const HOST_ERROR_ACKNOWLEDGED_T: u32 = 0x0000_0040;
pub const HOST_ERROR_OFFLINE_T: u32 = 0x0000_0080;
pub const HOST_ERROR_OFFLINE_STATIC: u32 = 0x0000_0100;
pub const HOST_WARN_TIME_REACHED: u32 = 0x0000_0200;
pub const PENDING_ERRORS: u32 = 0x0000_0400;
pub const ERROR_QUEUE_SET: u32 = 0x0000_0800;
pub const DO_NOT_DELETE_DATA: u32 = 0x0000_1000;
pub const SIMULATE_SEND_MODE: u32 = 0x0000_2000;
pub const ERROR_HOSTS_IN_GROUP: u32 = 0x0000_4000;
pub const WARN_HOSTS_IN_GROUP: u32 = 0x0000_8000;
pub const STORE_IP: u32 = 0x0001_0000;
pub const HOST_ACTION_SUCCESS: u32 = 0x0002_0000;
pub const EVENT_STATUS_FLAGS: u32 =
    HOST_ERROR_ACKNOWLEDGED | HOST_ERROR_OFFLINE | HOST_ERROR_ACKNOWLEDGED_T | HOST_ERROR_OFFLINE_T;
/// Bits an operator sets in HOST_CONFIG; everything else is runtime state.
pub const HOST_CONFIG_STATUS_MASK: u32 =
    STOP_TRANSFER | PAUSE_QUEUE | HOST_ERROR_OFFLINE_STATIC | DO_NOT_DELETE_DATA | SIMULATE_SEND_MODE | STORE_IP;

// -------- special_flag bits (host) --------
pub const HOST_DISABLED: u32 = 0x0000_0001;
pub const HOST_IN_DIR_CONFIG: u32 = 0x0000_0002;
pub const HOST_NOT_IN_DIR_CONFIG: u32 = 0x0000_0004;
pub const KEEP_CON_NO_SEND: u32 = 0x0000_0008;
pub const KEEP_CON_NO_FETCH: u32 = 0x0000_0010;
pub const DISABLE_HOST_WARN_TIME: u32 = 0x0000_0020;
pub const HOST_TWO_FLAG: u32 = 0x0000_0040;
pub const HOST_CONFIG_SPECIAL_MASK: u32 =
    HOST_DISABLED | KEEP_CON_NO_SEND | KEEP_CON_NO_FETCH | DISABLE_HOST_WARN_TIME;

// -------- host toggles --------
pub const HOST_ONE: u8 = 1;
pub const HOST_TWO: u8 = 2;
pub const AUTO_TOGGLE_OFF: u8 = 0;
pub const AUTO_TOGGLE_ON: u8 = 1;

// -------- connect_status (slot) --------
pub const DISCONNECT: u8 = 0;
pub const CONNECTING: u8 = 1;
pub const ACTIVE: u8 = 2;
pub const NOT_WORKING: u8 = 3;
pub const CLOSING_CONNECTION: u8 = 4;

// -------- FRA dir_flag --------
pub const ALL_DISABLED: u32 = 0x0000_0001;
pub const DIR_ERROR_SET: u32 = 0x0000_0002;
pub const MAX_COPIED: u32 = 0x0000_0004;
pub const DIR_DISABLED: u32 = 0x0000_0008;
pub const FILES_IN_QUEUE: u32 = 0x0000_0010;
pub const IN_SAME_FILESYSTEM: u32 = 0x0000_0020;
pub const WARN_TIME_REACHED: u32 = 0x0000_0040;
pub const INFO_TIME_REACHED: u32 = 0x0000_0080;
pub const DIR_STOPPED: u32 = 0x0000_0100;
pub const TIME_EXTERNAL: u32 = 0x0000_0200;
/// Runtime bits carried across a reload.
pub const DIR_FLAG_RUNTIME_MASK: u32 =
    DIR_ERROR_SET | MAX_COPIED | FILES_IN_QUEUE | WARN_TIME_REACHED | INFO_TIME_REACHED | DIR_STOPPED;

// -------- FRA dir_options --------
pub const ACCEPT_DOT_FILES: u32 = 0x0000_0001;
pub const IGNORE_EMPTY: u32 = 0x0000_0002;
pub const DIR_ADJUST_RL_SIZE: u32 = 0x0000_0004;
pub const DONT_GET_DIR_LIST: u32 = 0x0000_0008;

// -------- FRA delete_files_flag --------
pub const UNKNOWN_FILES: u8 = 0x01;
pub const QUEUED_FILES: u8 = 0x02;
pub const OLD_LOCKED_FILES: u8 = 0x04;
pub const UNREADABLE_FILES: u8 = 0x08;

// -------- FRA in_dc_flag: which dir options were set explicitly --------
pub const DIR_ALIAS_IDC: u32 = 0x0000_0001;
pub const UNKNOWN_FILES_IDC: u32 = 0x0000_0002;
pub const QUEUED_FILES_IDC: u32 = 0x0000_0004;
pub const OLD_LOCKED_FILES_IDC: u32 = 0x0000_0008;
pub const REPORT_UNKNOWN_FILES_IDC: u32 = 0x0000_0010;
pub const MAX_CP_FILES_IDC: u32 = 0x0000_0020;
pub const MAX_CP_FILE_SIZE_IDC: u32 = 0x0000_0040;
pub const WARN_TIME_IDC: u32 = 0x0000_0080;
pub const INFO_TIME_IDC: u32 = 0x0000_0100;
pub const MAX_PROCESS_IDC: u32 = 0x0000_0200;
pub const MAX_ERRORS_IDC: u32 = 0x0000_0400;
pub const KEEP_CONNECTED_IDC: u32 = 0x0000_0800;
pub const UNREADABLE_FILES_IDC: u32 = 0x0000_1000;
pub const PRIORITY_IDC: u32 = 0x0000_2000;
pub const IGNORE_SIZE_IDC: u32 = 0x0000_4000;
pub const IGNORE_FILE_TIME_IDC: u32 = 0x0000_8000;
pub const END_CHARACTER_IDC: u32 = 0x0001_0000;
pub const WAIT_FOR_IDC: u32 = 0x0002_0000;
pub const TIME_IDC: u32 = 0x0004_0000;
pub const TIMEZONE_IDC: u32 = 0x0008_0000;
pub const DUPCHECK_IDC: u32 = 0x0010_0000;
pub const ACCUMULATE_IDC: u32 = 0x0020_0000;
pub const ACCUMULATE_SIZE_IDC: u32 = 0x0040_0000;
pub const FORCE_REREAD_IDC: u32 = 0x0080_0000;
pub const REMOVE_IDC: u32 = 0x0100_0000;
pub const STUPID_MODE_IDC: u32 = 0x0200_0000;
pub const IMPORTANT_DIR_IDC: u32 = 0x0400_0000;
pub const ACCEPT_DOT_FILES_IDC: u32 = 0x0800_0000;
pub const IGNORE_EMPTY_IDC: u32 = 0x1000_0000;
pub const ADJUST_RL_SIZE_IDC: u32 = 0x2000_0000;

// -------- comparator flags (gt_lt_sign) --------
pub const ISIZE_EQUAL: u32 = 0x01;
pub const ISIZE_LESS_THEN: u32 = 0x02;
pub const ISIZE_GREATER_THEN: u32 = 0x04;
pub const IFTIME_EQUAL: u32 = 0x08;
pub const IFTIME_LESS_THEN: u32 = 0x10;
pub const IFTIME_GREATER_THEN: u32 = 0x20;

// -------- force_reread --------
pub const REREAD_NO: u8 = 0;
pub const REREAD_YES: u8 = 1;
pub const REREAD_REMOTE_ONLY: u8 = 2;
pub const REREAD_LOCAL_ONLY: u8 = 3;

// -------- stupid_mode --------
pub const STUPID_NO: u8 = 0;
pub const STUPID_YES: u8 = 1;
pub const GET_ONCE_ONLY: u8 = 2;

// -------- dir_status --------
pub const NORMAL_STATUS: u8 = 0;
pub const DIRECTORY_ACTIVE: u8 = 1;
pub const DIR_ERROR_STATUS: u8 = 2;
pub const DIR_DISABLED_STATUS: u8 = 3;

// -------- dupcheck flags --------
pub const DC_FILENAME_ONLY: u32 = 0x0001;
pub const DC_FILE_CONTENT: u32 = 0x0002;
pub const DC_FILE_CONT_NAME: u32 = 0x0004;
pub const DC_NAME_NO_SUFFIX: u32 = 0x0008;
pub const DC_DELETE: u32 = 0x0100;
pub const DC_STORE: u32 = 0x0200;
pub const DC_WARN: u32 = 0x0400;

// -------- JID special flags (option decision) --------
pub const DO_NOT_LINK_FILES: u32 = 0x0001;
pub const GO_PARALLEL: u32 = 0x0002;
pub const DELETE_ALL_FILES: u32 = 0x0004;
pub const TIME_JOB: u32 = 0x0008;
pub const TIME_NO_COLLECT: u32 = 0x0010;
pub const LOCAL_OPTIONS: u32 = 0x0020;

// -------- component states in the status record --------
pub const OFF: u8 = 0;
pub const ON: u8 = 1;
pub const STOPPED: u8 = 2;
pub const SHUTDOWN_STATE: u8 = 3;

/// Feature flag bit: a new generation allocated but not yet populated.
pub const FEATURE_BUILDING: u8 = 0x01;
