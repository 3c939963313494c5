//! Stop-reading flag for `load`, set from SIGINT/SIGTERM.
//!
//! The first signal stops producers from reading further input; rows already
//! buffered are still drained by `Pipeline::close`. A second signal exits.

use std::sync::atomic::{AtomicBool, Ordering};

fn stop_flag() -> &'static AtomicBool {
    static FLAG: AtomicBool = AtomicBool::new(false);
    &FLAG
}

pub fn stop_requested() -> bool {
    stop_flag().load(Ordering::Relaxed)
}

pub fn install_handlers() {
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        // SAFETY: the handler only touches an atomic and calls _exit
        let registered = unsafe {
            signal_hook::low_level::register(signal, || {
                if stop_flag().swap(true, Ordering::Relaxed) {
                    signal_hook::low_level::exit(130);
                }
            })
        };
        if let Err(e) = registered {
            log::warn!("cannot install handler for signal {signal}: {e}");
        }
    }
}
