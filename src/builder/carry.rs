//! Moving runtime state from the previous generation to the new one.

use crate::consts::*;
use crate::dirconfig::HostEntry;
use crate::fra::DirRec;
use crate::fsa::HostRec;

/// Initialise a host record from its configuration.
pub fn init_host<B: AsRef<[u8]> + AsMut<[u8]>>(h: &mut HostRec<B>, e: &HostEntry) {
    h.set_host_alias(&e.alias);
    h.set_host_id(crate::util::checksum_str(&e.alias));
    if e.group_header {
        h.mark_group_header();
        h.set_allowed_transfers(0);
        h.set_host_dsp_name(&e.alias);
        return;
    }
    h.set_real_hostname(0, &e.real_hostname[0]);
    h.set_real_hostname(1, &e.real_hostname[1]);
    h.set_toggle_str(&e.toggle_str);
    h.set_proxy_name(&e.proxy_name);
    h.set_allowed_transfers(e.allowed_transfers);
    h.set_max_errors(e.max_errors);
    h.set_retry_interval(e.retry_interval);
    h.set_block_size(e.block_size);
    h.set_max_successful_retries(e.max_successful_retries);
    h.set_transfer_timeout(e.transfer_timeout);
    h.set_host_status(e.host_status);
    h.set_protocol_options(e.protocol_options);
    h.set_transfer_rate_limit(e.transfer_rate_limit);
    h.set_ttl(e.ttl);
    h.set_socksnd_bufsize(e.socksnd_bufsize);
    h.set_sockrcv_bufsize(e.sockrcv_bufsize);
    h.set_keep_connected(e.keep_connected);
    h.set_warn_time(e.warn_time);
    h.set_special_flag(e.special_flag);
    h.set_host_toggle(HOST_ONE);
    h.set_original_toggle_pos(HOST_ONE);
    if e.toggle_str.is_empty() || e.real_hostname[1].is_empty() {
        h.set_auto_toggle(AUTO_TOGGLE_OFF);
    } else if e.auto_toggle() {
        h.set_auto_toggle(AUTO_TOGGLE_ON);
    } else {
        h.set_auto_toggle(AUTO_TOGGLE_OFF);
    }
}

/// Configuration view of a host record (inverse of `init_host`).
pub fn entry_of<B: AsRef<[u8]>>(h: &HostRec<B>) -> HostEntry {
    let group = h.is_group_header();
    HostEntry {
        alias: h.host_alias(),
        group_header: group,
        real_hostname: if group {
            [String::new(), String::new()]
        } else {
            [h.real_hostname(0), h.real_hostname(1)]
        },
        toggle_str: h.toggle_str(),
        proxy_name: h.proxy_name(),
        allowed_transfers: h.allowed_transfers(),
        max_errors: h.max_errors(),
        retry_interval: h.retry_interval(),
        block_size: h.block_size(),
        max_successful_retries: h.max_successful_retries(),
        transfer_timeout: h.transfer_timeout(),
        host_status: h.host_status() & HOST_CONFIG_STATUS_MASK,
        protocol_options: h.protocol_options(),
        transfer_rate_limit: h.transfer_rate_limit(),
        ttl: h.ttl(),
        socksnd_bufsize: h.socksnd_bufsize(),
        sockrcv_bufsize: h.sockrcv_bufsize(),
        keep_connected: h.keep_connected(),
        warn_time: h.warn_time(),
        special_flag: h.special_flag() & HOST_CONFIG_SPECIAL_MASK,
    }
}

/// Overlay counters and runtime flags of `old` onto a freshly initialised
/// record. Configured status bits come from the new record.
pub fn carry_host<B: AsRef<[u8]> + AsMut<[u8]>>(new: &mut HostRec<B>, old: &HostRec<&[u8]>) {
    new.set_error_counter(old.error_counter());
    new.set_total_errors(old.total_errors());
    new.set_error_history(&old.error_history());
    new.set_total_file_counter(old.total_file_counter());
    new.set_total_file_size(old.total_file_size());
    new.set_file_counter_done(old.file_counter_done());
    new.set_bytes_send(old.bytes_send());
    new.set_connections(old.connections());
    new.set_active_transfers(old.active_transfers());
    new.set_jobs_queued(old.jobs_queued());
    new.set_last_connection(old.last_connection());
    new.set_last_retry_time(old.last_retry_time());
    new.set_first_error_time(old.first_error_time());
    new.set_start_event_handle(old.start_event_handle());
    new.set_end_event_handle(old.end_event_handle());
    new.set_successful_retries(old.successful_retries());
    if old.host_id() != 0 {
        new.set_host_id(old.host_id());
    }
    let status = (old.host_status() & !HOST_CONFIG_STATUS_MASK) | (new.host_status() & HOST_CONFIG_STATUS_MASK);
    new.set_host_status(status);
    let keep_special = old.special_flag() & HOST_TWO_FLAG;
    new.set_special_flag(new.special_flag() | keep_special);
    // Keep the active hostname only if there still is a second one.
    if !new.real_hostname_2().is_empty() {
        new.set_host_toggle(old.host_toggle());
        new.set_original_toggle_pos(old.original_toggle_pos());
    }

    let usable = new.usable_slots();
    for i in 0..usable {
        let o = old.slot(i);
        if o.proc_id() > 0 {
            new.slot_mut(i).copy_from(&o);
        }
    }
    // Workers in slots above the new cap are no longer counted.
    let live = new.live_slots();
    if live != new.active_transfers() {
        new.set_active_transfers(live);
    }
}

/// Copy the runtime part of a directory record.
pub fn carry_dir<B: AsRef<[u8]> + AsMut<[u8]>>(new: &mut DirRec<B>, old: &DirRec<&[u8]>) {
    new.set_bytes_received(old.bytes_received());
    new.set_files_received(old.files_received());
    new.set_files_in_dir(old.files_in_dir());
    new.set_bytes_in_dir(old.bytes_in_dir());
    new.set_files_queued(old.files_queued());
    new.set_bytes_in_queue(old.bytes_in_queue());
    new.set_error_counter(old.error_counter());
    new.set_no_of_process(old.no_of_process());
    new.set_last_retrieval(old.last_retrieval());
    new.set_dir_mtime(old.dir_mtime());
    new.set_queued(old.queued());
    new.set_dir_status(old.dir_status());
    new.set_dir_flag((new.dir_flag() & !DIR_FLAG_RUNTIME_MASK) | (old.dir_flag() & DIR_FLAG_RUNTIME_MASK));
    if !new.is_externally_scheduled() && !old.is_externally_scheduled() {
        new.set_next_check_time(old.next_check_time());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AfdConfig;
    use crate::fsa::HOST_RECORD_SIZE;

    #[test]
    fn counters_survive_and_config_status_is_replaced() {
        let cfg = AfdConfig::default();
        let mut old_buf = vec![0u8; HOST_RECORD_SIZE];
        let mut e = HostEntry::with_defaults("h", &cfg);
        e.host_status = STOP_TRANSFER;
        {
            let mut o = HostRec::new(&mut old_buf[..]);
            init_host(&mut o, &e);
            o.init_slots();
            o.set_total_file_counter(7);
            o.set_total_file_size(42);
            o.set_error_counter(2);
            o.push_error_history(2);
            o.set_host_status(STOP_TRANSFER | AUTO_PAUSE_QUEUE);
        }
        e.host_status = 0;
        let mut new_buf = vec![0u8; HOST_RECORD_SIZE];
        let mut n = HostRec::new(&mut new_buf[..]);
        init_host(&mut n, &e);
        n.init_slots();
        carry_host(&mut n, &HostRec::new(&old_buf[..]));
        assert_eq!((n.total_file_counter(), n.total_file_size(), n.error_counter()), (7, 42, 2));
        assert_eq!(n.error_history()[0], 2);
        assert_eq!(n.host_status(), AUTO_PAUSE_QUEUE);
        assert_eq!(n.host_id(), crate::util::checksum_str("h"));
    }
}
