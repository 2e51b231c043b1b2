/*
 * mnet - Event-driven TCP server/client engines with multicast helpers
 * This is free and unencumbered software released into the public domain.
 */
use std::io::Result;

/// Pins the calling thread to a single CPU core.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) fn pin_current_thread(core: usize) -> Result<()> {
    use std::io::{Error, ErrorKind};
    use std::mem;

    if core >= libc::CPU_SETSIZE as usize {
        return Err(Error::new(ErrorKind::InvalidInput, "CPU core index out of range"));
    }

    unsafe {
        let mut set: libc::cpu_set_t = mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core, &mut set);
        if libc::sched_setaffinity(0, mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
            return Err(Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) fn pin_current_thread(_core: usize) -> Result<()> {
    use std::io::{Error, ErrorKind};
    Err(Error::new(ErrorKind::Unsupported, "CPU affinity is not supported on this platform"))
}
